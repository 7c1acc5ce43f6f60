// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CASS Cpumask
//!
//! A fixed-width cpumask that can be built, combined, and walked without
//! touching the heap.
//!
//! Cpumask
//! -------
//!
//! A Cpumask is a `BitArray` of `MAX_CPUS` bits stored in u64 words. Unlike a
//! `BitVec` backed mask, it is `Copy`, so placement code can intersect masks
//! and keep the result on the stack.
//!
//! Masks are usually built from a kernel cpulist or a hexadecimal string:
//!
//!```
//!     use scx_cass::Cpumask;
//!     let little = Cpumask::from_cpulist("0-3").unwrap();
//!     let big = Cpumask::from_str("0xf0").unwrap();
//!     assert!(little.and(&big).is_empty());
//!     assert_eq!(little.or(&big).weight(), 8);
//!```
//!
//! The hexadecimal string also supports the special values "none" and "all".
//! "all" sets every bit up to `MAX_CPUS`, so it is normally intersected with
//! a narrower mask before use.

use std::fmt;
use std::ops::BitAndAssign;
use std::ops::BitOrAssign;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use bitvec::prelude::*;
use sscanf::sscanf;

use crate::MAX_CPUS;

const MASK_WORDS: usize = MAX_CPUS / 64;

#[derive(Debug, Eq, Clone, Copy, Hash, PartialEq)]
pub struct Cpumask {
    mask: BitArray<[u64; MASK_WORDS], Lsb0>,
}

impl Default for Cpumask {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpumask {
    fn check_cpu(cpu: usize) -> Result<()> {
        if cpu >= MAX_CPUS {
            bail!("Invalid CPU {} passed, max {}", cpu, MAX_CPUS);
        }

        Ok(())
    }

    /// Build a new empty Cpumask object.
    pub fn new() -> Cpumask {
        Cpumask {
            mask: BitArray::new([0u64; MASK_WORDS]),
        }
    }

    /// Build a Cpumask with the first @nr_cpus bits set.
    pub fn first_n(nr_cpus: usize) -> Result<Cpumask> {
        if nr_cpus > MAX_CPUS {
            bail!("{} CPUs requested, max {}", nr_cpus, MAX_CPUS);
        }
        let mut mask = Cpumask::new();
        mask.mask[..nr_cpus].fill(true);
        Ok(mask)
    }

    /// Build a Cpumask object from a hexadecimal string.
    pub fn from_str(cpumask: &str) -> Result<Cpumask> {
        match cpumask {
            "none" => return Ok(Cpumask::new()),
            "all" => {
                let mut mask = Cpumask::new();
                mask.mask.fill(true);
                return Ok(mask);
            }
            _ => {}
        }
        let hex_str = {
            let mut tmp_str = cpumask
                .strip_prefix("0x")
                .unwrap_or(cpumask)
                .replace(['_', ','], "");
            if tmp_str.len() % 2 != 0 {
                tmp_str = "0".to_string() + &tmp_str;
            }
            tmp_str
        };
        let byte_vec =
            hex::decode(&hex_str).with_context(|| format!("Failed to parse cpumask: {cpumask}"))?;

        let mut mask = Cpumask::new();
        for (index, &val) in byte_vec.iter().rev().enumerate() {
            let mut v = val;
            while v != 0 {
                let lsb = v.trailing_zeros() as usize;
                v &= !(1 << lsb);
                let cpu = index * 8 + lsb;
                if cpu >= MAX_CPUS {
                    bail!(
                        "Found cpu ({}) in cpumask ({}) which is larger than the max ({})",
                        cpu,
                        cpumask,
                        MAX_CPUS
                    );
                }
                mask.mask.set(cpu, true);
            }
        }

        Ok(mask)
    }

    pub fn from_cpulist(cpulist: &str) -> Result<Cpumask> {
        let mut mask = Cpumask::new();
        for cpu_id in read_cpulist(cpulist)? {
            mask.set_cpu(cpu_id)?;
        }

        Ok(mask)
    }

    pub fn from_cpus<I: IntoIterator<Item = usize>>(cpus: I) -> Result<Cpumask> {
        let mut mask = Cpumask::new();
        for cpu in cpus {
            mask.set_cpu(cpu)?;
        }
        Ok(mask)
    }

    /// Return a slice of u64's whose bits reflect the Cpumask.
    pub fn as_raw_slice(&self) -> &[u64] {
        self.mask.as_raw_slice()
    }

    /// Set a bit in the Cpumask. Returns an error if the specified CPU exceeds
    /// the size of the Cpumask.
    pub fn set_cpu(&mut self, cpu: usize) -> Result<()> {
        Self::check_cpu(cpu)?;
        self.mask.set(cpu, true);
        Ok(())
    }

    /// Clear a bit from the Cpumask. Returns an error if the specified CPU
    /// exceeds the size of the Cpumask.
    pub fn clear_cpu(&mut self, cpu: usize) -> Result<()> {
        Self::check_cpu(cpu)?;
        self.mask.set(cpu, false);
        Ok(())
    }

    /// Test whether the specified CPU bit is set in the Cpumask. CPUs beyond
    /// the width of the mask are never set.
    pub fn test_cpu(&self, cpu: usize) -> bool {
        match self.mask.get(cpu) {
            Some(bit) => *bit,
            None => false,
        }
    }

    /// Count the number of bits set in the Cpumask.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    /// Return true if the Cpumask has no bit set, false otherwise.
    pub fn is_empty(&self) -> bool {
        self.mask.not_any()
    }

    /// The lowest CPU set in the mask, if any.
    pub fn first(&self) -> Option<usize> {
        self.mask.first_one()
    }

    /// The highest CPU set in the mask, if any.
    pub fn last(&self) -> Option<usize> {
        self.mask.last_one()
    }

    /// Create a Cpumask that is the AND of the current Cpumask and another.
    pub fn and(&self, other: &Cpumask) -> Cpumask {
        let mut new = *self;
        new &= other;
        new
    }

    /// Create a Cpumask that is the OR of the current Cpumask and another.
    pub fn or(&self, other: &Cpumask) -> Cpumask {
        let mut new = *self;
        new |= other;
        new
    }

    /// Return true if every CPU in @self is also set in @other.
    pub fn is_subset(&self, other: &Cpumask) -> bool {
        self.as_raw_slice()
            .iter()
            .zip(other.as_raw_slice())
            .all(|(a, b)| a & !b == 0)
    }

    /// Iterate over the CPUs set in the mask in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter_ones()
    }

    /// Render the mask as a kernel cpulist, e.g. "0-3,6".
    pub fn to_cpulist(&self) -> String {
        let mut out = String::new();
        let mut run: Option<(usize, usize)> = None;
        let flush = |out: &mut String, (lo, hi): (usize, usize)| {
            if !out.is_empty() {
                out.push(',');
            }
            if lo == hi {
                out.push_str(&lo.to_string());
            } else {
                out.push_str(&format!("{lo}-{hi}"));
            }
        };
        for cpu in self.iter() {
            run = match run {
                Some((lo, hi)) if hi + 1 == cpu => Some((lo, cpu)),
                Some(r) => {
                    flush(&mut out, r);
                    Some((cpu, cpu))
                }
                None => Some((cpu, cpu)),
            };
        }
        if let Some(r) = run {
            flush(&mut out, r);
        }
        out
    }

    fn fmt_with(&self, f: &mut fmt::Formatter<'_>, case: char) -> fmt::Result {
        let mut masks: Vec<u32> = self
            .as_raw_slice()
            .iter()
            .flat_map(|x| [*x as u32, (x >> 32) as u32])
            .collect();

        // Only print as many 32bit words as needed to reach the highest CPU.
        let nr_words = self.last().map_or(1, |cpu| cpu / 32 + 1);
        masks.truncate(nr_words);

        let top = masks.pop().unwrap_or(0);
        match case {
            'x' => write!(f, "{top:x}")?,
            'X' => write!(f, "{top:X}")?,
            _ => unreachable!(),
        }

        for submask in masks.iter().rev() {
            match case {
                'x' => write!(f, ",{submask:08x}")?,
                'X' => write!(f, ",{submask:08X}")?,
                _ => unreachable!(),
            }
        }
        Ok(())
    }
}

pub fn read_cpulist(cpulist: &str) -> Result<Vec<usize>> {
    let cpulist = cpulist.trim_end_matches('\0').trim();
    let mut cpu_ids = vec![];
    if cpulist.is_empty() {
        return Ok(cpu_ids);
    }
    for group in cpulist.split(',') {
        let (min, max) = match sscanf!(group.trim(), "{usize}-{usize}") {
            Ok((x, y)) => (x, y),
            Err(_) => match sscanf!(group.trim(), "{usize}") {
                Ok(x) => (x, x),
                Err(_) => {
                    bail!("Failed to parse cpulist {}", group.trim());
                }
            },
        };
        if min > max {
            bail!("Invalid cpulist range {}", group.trim());
        }
        if max >= MAX_CPUS {
            bail!(
                "Found cpu ({}) in cpulist ({}) which is larger than the max ({})",
                max,
                cpulist,
                MAX_CPUS
            );
        }
        for i in min..(max + 1) {
            cpu_ids.push(i);
        }
    }

    Ok(cpu_ids)
}

impl fmt::Display for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'x')
    }
}

impl fmt::LowerHex for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'x')
    }
}

impl fmt::UpperHex for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'X')
    }
}

impl BitAndAssign<&Self> for Cpumask {
    fn bitand_assign(&mut self, rhs: &Self) {
        for (word, other) in self
            .mask
            .as_raw_mut_slice()
            .iter_mut()
            .zip(rhs.as_raw_slice())
        {
            *word &= *other;
        }
    }
}

impl BitOrAssign<&Self> for Cpumask {
    fn bitor_assign(&mut self, rhs: &Self) {
        for (word, other) in self
            .mask
            .as_raw_mut_slice()
            .iter_mut()
            .zip(rhs.as_raw_slice())
        {
            *word |= *other;
        }
    }
}
