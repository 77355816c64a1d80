use alloc::vec::Vec;

/// Erase plan of (opcode, size, base address) to erase a range of memory.
#[derive(Clone, Debug)]
pub(crate) struct ErasePlan(pub Vec<(u8, usize, u32)>);

impl ErasePlan {
    /// Plan erase operations covering every byte of `start..start+length`.
    ///
    /// `insts` is a list of (size, opcode), where every size is a multiple
    /// of the smallest one. The range is widened to whole units of the
    /// smallest instruction, and no operation reaches outside that widened
    /// range, so only the units the range touches are erased.
    pub fn new(insts: &[(usize, u8)], start: usize, length: usize) -> Self {
        log::trace!("Creating erase plan, start={} length={}", start, length);
        let mut plan = Vec::new();

        // Sort instructions by largest area of effect first.
        let mut insts = insts.to_vec();
        insts.sort_by(|a, b| b.0.cmp(&a.0));
        let unit = match insts.last() {
            Some((size, _)) => *size,
            None => return ErasePlan(plan),
        };

        let mut pos = start - (start % unit);
        let end = match (start + length) % unit {
            0 => start + length,
            rem => start + length + unit - rem,
        };

        // At each position, use the largest aligned operation which fits.
        while pos < end {
            log::trace!("Evaluating candidates, pos={} end={}", pos, end);
            let (size, opcode) = insts.iter()
                .find(|(size, _)| pos % size == 0 && pos + size <= end)
                .copied()
                .unwrap_or(insts[insts.len() - 1]);
            log::trace!("Candidate selected: 0x{:02X} ({} bytes) at {}", opcode, size, pos);
            plan.push((opcode, size, pos as u32));
            pos += size;
        }

        log::debug!("Erase plan: {:?}", plan);

        ErasePlan(plan)
    }

    #[cfg(feature = "std")]
    pub fn total_size(&self) -> usize {
        self.0.iter().map(|x| x.1).sum()
    }
}

#[test]
fn test_erase_plan() {
    let insts = &[(4, 1), (32, 2)];
    // Use a single unit erase for a range inside one unit.
    assert_eq!(ErasePlan::new(insts, 1, 2).0, alloc::vec![(1, 4, 0)]);
    // Use a single large erase to erase an aligned block.
    assert_eq!(ErasePlan::new(insts, 0, 32).0, alloc::vec![(2, 32, 0)]);
    // Use two large erases for two aligned blocks.
    assert_eq!(
        ErasePlan::new(insts, 32, 64).0,
        alloc::vec![(2, 32, 32), (2, 32, 64)]
    );
    // Never erase a whole block for a range only partially covering it.
    assert_eq!(
        ErasePlan::new(insts, 2, 10).0,
        alloc::vec![(1, 4, 0), (1, 4, 4), (1, 4, 8)]
    );
    // Use units up to the block boundary, then a block, then trailing units.
    assert_eq!(
        ErasePlan::new(insts, 24, 48).0,
        alloc::vec![(1, 4, 24), (1, 4, 28), (2, 32, 32), (1, 4, 64), (1, 4, 68)]
    );
    // Instruction order in the input does not matter.
    assert_eq!(
        ErasePlan::new(&[(32, 2), (4, 1)], 0, 36).0,
        alloc::vec![(2, 32, 0), (1, 4, 32)]
    );
}
