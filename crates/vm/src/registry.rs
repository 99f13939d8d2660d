//! The program registry: compiled programs by dbref, compile-on-demand,
//! uncompile and the idle-program reaper.

use std::collections::HashMap;

use muf_compiler::{CompileRequest, MacroTable, PublicsView};
use muf_core::{Dbref, Instr, ObjFlags, ObjectDb, Op, Outbound, Program};

use crate::error::{VmError, VmResult};

/// Compiled programs currently resident in memory.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    programs: HashMap<Dbref, Program>,
    generation: u64,
}

impl ProgramRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the program has a resident instruction array.
    pub fn is_compiled(&self, prog: Dbref) -> bool {
        self.programs.contains_key(&prog)
    }

    /// Borrows a resident program.
    pub fn get(&self, prog: Dbref) -> Option<&Program> {
        self.programs.get(&prog)
    }

    /// Mutably borrows a resident program.
    pub fn get_mut(&mut self, prog: Dbref) -> Option<&mut Program> {
        self.programs.get_mut(&prog)
    }

    /// Fetches one instruction. A missing program or out-of-range index is
    /// an interpreter fault, not a program error.
    pub fn instr(&self, prog: Dbref, pc: usize) -> VmResult<&Instr> {
        let program = self
            .programs
            .get(&prog)
            .ok_or_else(|| VmError::internal(format!("Program {prog} not in memory.")))?;
        program
            .instructions
            .get(pc)
            .ok_or_else(|| VmError::internal(format!("PC {pc} outside program {prog}.")))
    }

    /// Compiles `prog` if it has no resident instruction array yet.
    #[allow(clippy::too_many_arguments)]
    pub fn ensure_compiled(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        macros: &MacroTable,
        player: Dbref,
        prog: Dbref,
        now: u64,
        force_err_display: bool,
    ) -> VmResult<()> {
        if self.is_compiled(prog) {
            return Ok(());
        }
        self.compile(db, output, macros, player, prog, now, force_err_display)
    }

    /// Compiles `prog` unconditionally, replacing any resident code.
    #[allow(clippy::too_many_arguments)]
    pub fn compile(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        macros: &MacroTable,
        player: Dbref,
        prog: Dbref,
        now: u64,
        force_err_display: bool,
    ) -> VmResult<()> {
        self.uncompile(prog);
        self.generation += 1;

        let view = self.snapshot_publics();
        let result = muf_compiler::compile(CompileRequest {
            db,
            output,
            macros,
            publics_view: Some(&view),
            player,
            program: prog,
            force_err_display,
            generation: self.generation,
        });

        match result {
            Ok(mut program) => {
                program.last_used = now;
                program.profile_started = now;
                self.programs.insert(prog, program);
                Ok(())
            }
            Err(err) => {
                if force_err_display {
                    output.notify(player, &err.to_string());
                }
                Err(VmError::environment(format!(
                    "Program not compilable. ({err})"
                )))
            }
        }
    }

    /// Installs an already-packed program, replacing any resident code.
    pub fn install(&mut self, program: Program) {
        self.programs.insert(program.dbref, program);
    }

    /// Frees a program's instruction array; the source stays persisted.
    pub fn uncompile(&mut self, prog: Dbref) {
        if let Some(program) = self.programs.remove(&prog) {
            if program.instance_count() > 0 {
                log::warn!(
                    "uncompiling program {} with {} live reference(s)",
                    prog,
                    program.instance_count()
                );
            }
        }
    }

    /// Frees every program untouched for longer than `max_age` seconds
    /// that has no running instances and is not marked autostart or
    /// internal. Returns how many were freed.
    pub fn reap_idle(&mut self, db: &dyn ObjectDb, now: u64, max_age: u64) -> usize {
        let stale: Vec<Dbref> = self
            .programs
            .iter()
            .filter(|(dbref, program)| {
                program.instance_count() == 0
                    && program.last_used.saturating_add(max_age) < now
                    && !db
                        .flags(**dbref)
                        .intersects(ObjFlags::AUTOSTART | ObjFlags::INTERNAL)
            })
            .map(|(dbref, _)| *dbref)
            .collect();
        for dbref in &stale {
            log::debug!("reaping idle program {dbref}");
            self.uncompile(*dbref);
        }
        stale.len()
    }

    /// Marks a program as just used.
    pub fn touch(&mut self, prog: Dbref, now: u64) {
        if let Some(program) = self.programs.get_mut(&prog) {
            program.last_used = now;
        }
    }

    /// Snapshot of every resident program's public names, for
    /// `$ifcancall` during a nested compile.
    fn snapshot_publics(&self) -> SnapshotPublics {
        SnapshotPublics {
            publics: self
                .programs
                .iter()
                .map(|(dbref, program)| {
                    (
                        *dbref,
                        program.publics.iter().map(|p| p.name.clone()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Counts instructions with cleared payloads across resident
    /// programs; a nonzero count means a lifecycle bug.
    pub fn sanity_cleared_count(&self) -> usize {
        self.programs
            .values()
            .flat_map(|p| p.instructions.iter())
            .filter(|i| matches!(i.op, Op::Cleared))
            .count()
    }
}

/// Publics visibility captured before a nested compile.
struct SnapshotPublics {
    publics: HashMap<Dbref, Vec<String>>,
}

impl PublicsView for SnapshotPublics {
    fn can_call(&self, _player: Dbref, prog: Dbref, func: &str) -> bool {
        self.publics
            .get(&prog)
            .map(|names| names.iter().any(|n| n.eq_ignore_ascii_case(func)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muf_core::{MemDb, RecordedOutput};

    fn setup() -> (MemDb, RecordedOutput, MacroTable, Dbref, Dbref) {
        let mut db = MemDb::new();
        let player = db.create_player("P");
        let prog = db.create_program("p.muf", player);
        db.set_program_source(prog, vec![": main 1 ;".to_string()]);
        (db, RecordedOutput::default(), MacroTable::new(), player, prog)
    }

    #[test]
    fn compiles_on_demand_and_caches() {
        let (mut db, mut out, macros, player, prog) = setup();
        let mut reg = ProgramRegistry::new();
        reg.ensure_compiled(&mut db, &mut out, &macros, player, prog, 0, true)
            .unwrap();
        assert!(reg.is_compiled(prog));
        // second call is a no-op
        reg.ensure_compiled(&mut db, &mut out, &macros, player, prog, 9, true)
            .unwrap();
        assert_eq!(reg.get(prog).unwrap().last_used, 0);
    }

    #[test]
    fn compile_errors_surface_to_the_player() {
        let (mut db, mut out, macros, player, prog) = setup();
        db.set_program_source(prog, vec![": main frobozz ;".to_string()]);
        let mut reg = ProgramRegistry::new();
        let err = reg
            .compile(&mut db, &mut out, &macros, player, prog, 0, true)
            .unwrap_err();
        assert!(matches!(err, VmError::Environment { .. }));
        assert!(out
            .notifies
            .iter()
            .any(|(_, m)| m.contains("frobozz")));
    }

    #[test]
    fn reaper_skips_fresh_pinned_and_flagged_programs() {
        let (mut db, mut out, macros, player, prog) = setup();
        let mut reg = ProgramRegistry::new();
        reg.compile(&mut db, &mut out, &macros, player, prog, 0, true)
            .unwrap();

        // fresh: not reaped
        assert_eq!(reg.reap_idle(&db, 100, 600), 0);

        // pinned: not reaped
        let addr = reg.get(prog).unwrap().make_address(0);
        assert_eq!(reg.reap_idle(&db, 10_000, 600), 0);
        drop(addr);

        // autostart flag: not reaped
        db.add_flags(prog, ObjFlags::AUTOSTART);
        assert_eq!(reg.reap_idle(&db, 10_000, 600), 0);
        db.set_flags(prog, ObjFlags::empty());

        assert_eq!(reg.reap_idle(&db, 10_000, 600), 1);
        assert!(!reg.is_compiled(prog));
    }
}
