//! Dead-code compaction and dense renumbering.

use crate::arena::{Handle, Range};
use crate::assembler::{Assembler, Section};
use crate::instruction::Ssa;
use crate::opcode::Opcode;

impl Assembler {
    /// An id is dead when nothing references it and dropping its definition
    /// cannot change behaviour, or when it was allocated but never defined.
    fn is_dead(&self, ssa: Ssa) -> bool {
        if self.ref_counts[ssa.index()] != 0 {
            return false;
        }
        match self.code_for(ssa) {
            Some(inst) => inst.opcode.is_pure(),
            None => true,
        }
    }

    /// Drops dead instructions and renumbers the surviving ids densely.
    ///
    /// Removing an instruction releases its references, which can make its
    /// operands dead in turn. The renumbering map is computed over the whole
    /// id space first and then applied to the stream and every side table in
    /// one step. Returns the number of ids whose value changed.
    pub fn flatten(&mut self) -> usize {
        let id_count = self.ssa_opcodes.len();
        let mut dead = vec![false; id_count];
        let mut removed = vec![false; self.code.len()];
        let mut worklist: Vec<Ssa> = Vec::new();

        for raw in 1..id_count {
            let ssa = Ssa(raw as u32);
            if self.is_dead(ssa) {
                dead[raw] = true;
                worklist.push(ssa);
            }
        }

        while let Some(ssa) = worklist.pop() {
            let Some(handle) = self.handle_for(ssa) else {
                continue;
            };
            let header = self.code[handle];
            let mut doomed = vec![handle.index()];
            if let Some(trailer) = header.opcode.trailer() {
                let count = header.operands[0] as usize;
                doomed.extend(
                    (handle.index() + 1..self.code.len())
                        .take(count)
                        .take_while(|&i| {
                            self.code
                                .try_get(Handle::new(i as u32))
                                .is_some_and(|inst| inst.opcode == trailer)
                        }),
                );
            }
            for index in doomed {
                if std::mem::replace(&mut removed[index], true) {
                    continue;
                }
                let inst = self.code[Handle::new(index as u32)];
                for r in inst.referenced() {
                    let Some(count) = self.ref_counts.get_mut(r.index()) else {
                        continue;
                    };
                    *count = count.saturating_sub(1);
                    if *count == 0 && !dead[r.index()] && self.is_dead(r) {
                        dead[r.index()] = true;
                        worklist.push(r);
                    }
                }
            }
        }

        // Old id -> new id; dead ids map to void.
        let mut map = vec![Ssa::VOID; id_count];
        let mut next = 1u32;
        let mut renumbered = 0;
        for raw in 1..id_count {
            if !dead[raw] {
                map[raw] = Ssa(next);
                if next as usize != raw {
                    renumbered += 1;
                }
                next += 1;
            }
        }
        let dropped = removed.iter().filter(|&&r| r).count();
        self.apply_renumbering(&map, &removed);
        log::debug!("flatten: dropped {dropped} instructions, renumbered {renumbered} ids");
        renumbered
    }

    fn apply_renumbering(&mut self, map: &[Ssa], removed: &[bool]) {
        let remap = |ssa: Ssa| map.get(ssa.index()).copied().unwrap_or(Ssa::VOID);

        let moved = self.code.compact(|h, _| !removed[h.index()]);
        for (_, inst) in self.code.iter_mut() {
            inst.id = remap(inst.id);
            for slot in inst.reference_slots_mut() {
                *slot = remap(*slot);
            }
        }

        let live = map.iter().filter(|ssa| !ssa.is_void()).count() + 1;
        let mut opcodes = vec![Opcode::Unknown; live];
        let mut counts = vec![0u32; live];
        for (old, new) in map.iter().enumerate().skip(1) {
            if !new.is_void() {
                opcodes[new.index()] = self.ssa_opcodes[old];
                counts[new.index()] = self.ref_counts[old];
            }
        }
        self.ssa_opcodes = opcodes;
        self.ref_counts = counts;
        self.ssa_code = vec![None; live];
        for (handle, inst) in self.code.iter() {
            if !inst.id.is_void() {
                self.ssa_code[inst.id.index()] = Some(handle);
            }
        }

        self.closed = std::mem::take(&mut self.closed)
            .into_iter()
            .filter_map(|section| {
                let first = moved.get(section.range.first().index()).copied().flatten()?;
                let last = moved
                    .get(section.range.end().index().checked_sub(1)?)
                    .copied()
                    .flatten()?;
                Some(Section {
                    header: remap(section.header),
                    range: Range::inclusive(first, last),
                    ..section
                })
            })
            .collect();
        for open in &mut self.sections {
            open.header = remap(open.header);
            if let Some(start) = moved.get(open.start.index()).copied().flatten() {
                open.start = start;
            }
            for ctx in &mut open.loops {
                ctx.continue_label = remap(ctx.continue_label);
                ctx.break_label = remap(ctx.break_label);
            }
        }
        for ctx in &mut self.root_loops {
            ctx.continue_label = remap(ctx.continue_label);
            ctx.break_label = remap(ctx.break_label);
        }

        self.names = std::mem::take(&mut self.names)
            .into_iter()
            .map(|(ssa, name)| (remap(ssa), name))
            .filter(|(ssa, _)| !ssa.is_void())
            .collect();
        self.io.retain_mut(|io| {
            io.var = remap(io.var);
            io.ty = remap(io.ty);
            !io.var.is_void()
        });
        self.types.renumber(&remap);
    }
}
