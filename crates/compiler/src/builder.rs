//! The intermediate builder: turns the preprocessed token stream into the
//! intermediate instruction list, maintaining the control-structure stack,
//! procedure table, publics and variable declarations.

use std::rc::Rc;

use muf_core::{Dbref, FuncHeader, Op, Prim, PublicEntry};

use crate::directives;
use crate::error::{CompileError, CompileResult};
use crate::state::{CompileState, CtrlKind, CurrProc, IrOp, ProcEntry};
use crate::token::RawToken;

/// Fetches the next fully preprocessed token: directives executed, escapes
/// stripped, defines and macros expanded.
pub(crate) fn next_token(st: &mut CompileState) -> CompileResult<Option<RawToken>> {
    loop {
        let Some(tok) = st.cursor.next_token_raw()? else {
            return Ok(None);
        };
        for warning in std::mem::take(&mut st.cursor.warnings) {
            let player = st.player;
            st.output.notify(player, &warning);
        }
        let word = match tok {
            RawToken::Str(_) => return Ok(Some(tok)),
            RawToken::Word(w) => w,
        };

        if let Some(rest) = word.strip_prefix('$') {
            directives::process_directive(st, rest)?;
            continue;
        }

        if let Some(rest) = word.strip_prefix('\\') {
            return Ok(Some(RawToken::Word(rest.to_string())));
        }

        if let Some(name) = word.strip_prefix('.') {
            let Some(expansion) = st.macros.expansion(name).map(|s| s.to_string()) else {
                return Err(st.abort(format!("Macro is not defined: .{name}")));
            };
            st.cursor.prepend(&expansion)?;
            continue;
        }

        if let Some(expansion) = st.defines.get(&word).map(|s| s.to_string()) {
            st.cursor.prepend(&expansion)?;
            continue;
        }

        return Ok(Some(RawToken::Word(word)));
    }
}

/// Runs the token loop to exhaustion, emitting intermediates.
pub(crate) fn build(st: &mut CompileState) -> CompileResult<()> {
    while let Some(tok) = next_token(st)? {
        next_word(st, tok)?;
    }
    if st.curr_proc.is_some() {
        return Err(CompileError::eof(st.cursor.lineno, " in procedure."));
    }
    if !st.control.is_empty() {
        return Err(st.abort("Unterminated control structure at end of program."));
    }
    if st.procs.is_empty() {
        return Err(st.abort("Missing procedure definition."));
    }
    Ok(())
}

/// Classifies one token and emits its intermediate(s). Checks run in the
/// same precedence order the compiler has always used: procedure call,
/// scoped variable, local variable, frame variable, structural keyword,
/// primitive, then the literal forms.
fn next_word(st: &mut CompileState, tok: RawToken) -> CompileResult<()> {
    let word = match tok {
        RawToken::Str(text) => {
            require_proc(st, "String")?;
            st.emit_op(Op::Str(Rc::new(text)));
            return Ok(());
        }
        RawToken::Word(w) => w,
    };

    if let Some(proc) = st.find_proc(&word) {
        require_proc(st, "Procedure call")?;
        let pos = proc.pos;
        let slot = st.get_address(pos, 0);
        st.emit_op(Op::Exec(slot));
        return Ok(());
    }
    if let Some(idx) = st.find_scopedvar(&word) {
        require_proc(st, "Scoped variable")?;
        st.emit_op(Op::SVar(idx));
        return Ok(());
    }
    if let Some(idx) = st.find_localvar(&word) {
        require_proc(st, "Local variable")?;
        st.emit_op(Op::LVar(idx));
        return Ok(());
    }
    if let Some(idx) = st.find_variable(&word) {
        require_proc(st, "Variable")?;
        st.emit_op(Op::Var(idx));
        return Ok(());
    }
    if is_special(&word) {
        return process_special(st, &word);
    }
    if word.eq_ignore_ascii_case("exit") {
        require_proc(st, "EXIT")?;
        st.emit_op(Op::Ret);
        return Ok(());
    }
    if let Some(prim) = Prim::lookup(&word) {
        require_proc(st, "Primitive")?;
        st.emit_op(Op::Primitive(prim));
        return Ok(());
    }
    if let Some(n) = parse_number(&word) {
        require_proc(st, "Integer")?;
        st.emit_op(Op::Int(n));
        return Ok(());
    }
    if let Some(f) = parse_float(&word) {
        require_proc(st, "Float")?;
        st.emit_op(Op::Float(f));
        return Ok(());
    }
    if let Some(obj) = parse_object(&word) {
        require_proc(st, "Dbref")?;
        st.emit_op(Op::Object(obj));
        return Ok(());
    }
    if let Some(name) = word.strip_prefix('\'') {
        if let Some(proc) = st.find_proc(name) {
            require_proc(st, "Address")?;
            let pos = proc.pos;
            let slot = st.get_address(pos, 0);
            st.emit(IrOp::AddrLit(slot));
            return Ok(());
        }
    }

    Err(st.abort(format!("Unrecognized word {word}.")))
}

/// Structural keywords handled by [`process_special`].
fn is_special(word: &str) -> bool {
    const SPECIALS: &[&str] = &[
        ":", ";", "IF", "ELSE", "THEN", "BEGIN", "FOR", "FOREACH", "UNTIL", "WHILE", "BREAK",
        "CONTINUE", "REPEAT", "TRY", "CATCH", "CATCH_DETAILED", "ENDCATCH", "CALL", "PUBLIC",
        "WIZCALL", "VAR", "VAR!", "LVAR",
    ];
    SPECIALS.iter().any(|s| s.eq_ignore_ascii_case(word))
}

/// Most words only mean something inside a procedure body.
fn require_proc(st: &CompileState, what: &str) -> CompileResult<()> {
    if st.curr_proc.is_none() {
        return Err(st.abort(format!("{what} outside procedure.")));
    }
    Ok(())
}

fn parse_number(word: &str) -> Option<i32> {
    let rest = word.strip_prefix(['+', '-']).unwrap_or(word);
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    word.parse().ok()
}

fn parse_float(word: &str) -> Option<f64> {
    if !word
        .bytes()
        .any(|b| matches!(b, b'.' | b'e' | b'E' | b'n' | b'N'))
    {
        return None;
    }
    word.parse().ok()
}

fn parse_object(word: &str) -> Option<Dbref> {
    word.parse().ok()
}

/// Compiles one structural keyword.
fn process_special(st: &mut CompileState, token: &str) -> CompileResult<()> {
    let upper = token.to_ascii_uppercase();
    match upper.as_str() {
        ":" => proc_start(st),
        ";" => proc_end(st),
        "IF" => {
            require_proc(st, "IF")?;
            let pos = st.emit_op(Op::If(0));
            st.add_control(CtrlKind::If, pos);
            Ok(())
        }
        "ELSE" => {
            require_proc(st, "ELSE")?;
            match st.innermost_control() {
                Some(CtrlKind::If) => {}
                Some(CtrlKind::Try) => {
                    return Err(st.abort("Unterminated TRY-CATCH block at ELSE."))
                }
                Some(CtrlKind::Catch) => {
                    return Err(st.abort("Unterminated CATCH-ENDCATCH block at ELSE."))
                }
                Some(CtrlKind::Begin) | Some(CtrlKind::For) => {
                    return Err(st.abort("Unterminated Loop at ELSE."))
                }
                _ => return Err(st.abort("ELSE without IF.")),
            }
            let jump = st.emit_op(Op::Jmp(0));
            let opened = st.pop_control()?;
            st.add_control(CtrlKind::Else, jump);
            let slot = st.get_address(jump, 1);
            st.words[opened.place].op.set_branch_slot(slot);
            Ok(())
        }
        "THEN" => {
            require_proc(st, "THEN")?;
            match st.innermost_control() {
                Some(CtrlKind::If) | Some(CtrlKind::Else) => {}
                Some(CtrlKind::Try) => {
                    return Err(st.abort("Unterminated TRY-CATCH block at THEN."))
                }
                Some(CtrlKind::Catch) => {
                    return Err(st.abort("Unterminated CATCH-ENDCATCH block at THEN."))
                }
                Some(CtrlKind::Begin) | Some(CtrlKind::For) => {
                    return Err(st.abort("Unterminated Loop at THEN."))
                }
                _ => return Err(st.abort("THEN without IF.")),
            }
            let opened = st.pop_control()?;
            let next = st.next_pos();
            let slot = st.get_address(next, 0);
            st.words[opened.place].op.set_branch_slot(slot);
            Ok(())
        }
        "BEGIN" => {
            require_proc(st, "BEGIN")?;
            let top = st.next_pos();
            st.add_control(CtrlKind::Begin, top);
            Ok(())
        }
        "FOR" | "FOREACH" => {
            require_proc(st, &upper)?;
            let opener = if upper == "FOR" {
                Prim::For
            } else {
                Prim::Foreach
            };
            st.emit_op(Op::Primitive(opener));
            let iter = st.emit_op(Op::Primitive(Prim::ForIter));
            st.emit_op(Op::If(0));
            st.add_control(CtrlKind::For, iter);
            // the If is the loop's first exit placeholder
            let if_pos = iter + 1;
            st.add_loop_exit(if_pos)?;
            Ok(())
        }
        "UNTIL" | "REPEAT" => loop_close(st, &upper),
        "WHILE" => {
            require_proc(st, "WHILE")?;
            if !st.in_loop() {
                return Err(st.abort("Can't have a WHILE outside of a loop."));
            }
            for _ in 0..st.count_trys_inside_loop() {
                st.emit_op(Op::Primitive(Prim::TryPop));
            }
            let pos = st.emit_op(Op::If(0));
            st.add_loop_exit(pos)?;
            Ok(())
        }
        "BREAK" => {
            require_proc(st, "BREAK")?;
            if !st.in_loop() {
                return Err(st.abort("Can't have a BREAK outside of a loop."));
            }
            for _ in 0..st.count_trys_inside_loop() {
                st.emit_op(Op::Primitive(Prim::TryPop));
            }
            let pos = st.emit_op(Op::Jmp(0));
            st.add_loop_exit(pos)?;
            Ok(())
        }
        "CONTINUE" => {
            require_proc(st, "CONTINUE")?;
            let Some(place) = st.innermost_loop_place() else {
                return Err(st.abort("Can't have a CONTINUE outside of a loop."));
            };
            for _ in 0..st.count_trys_inside_loop() {
                st.emit_op(Op::Primitive(Prim::TryPop));
            }
            let slot = st.get_address(place, 0);
            st.emit_op(Op::Jmp(slot));
            Ok(())
        }
        "TRY" => {
            require_proc(st, "TRY")?;
            let pos = st.emit_op(Op::Try(0));
            st.add_control(CtrlKind::Try, pos);
            st.nested_trys += 1;
            Ok(())
        }
        "CATCH" | "CATCH_DETAILED" => {
            require_proc(st, "CATCH")?;
            match st.innermost_control() {
                Some(CtrlKind::Try) => {}
                Some(CtrlKind::Begin) | Some(CtrlKind::For) => {
                    return Err(st.abort("Unterminated Loop at CATCH."))
                }
                Some(CtrlKind::If) | Some(CtrlKind::Else) => {
                    return Err(st.abort("Unterminated IF-THEN at CATCH."))
                }
                _ => return Err(st.abort("No TRY found for CATCH.")),
            }
            st.emit_op(Op::Primitive(Prim::TryPop));
            let jump = st.emit_op(Op::Jmp(0));
            let handler_prim = if upper == "CATCH" {
                Prim::Catch
            } else {
                Prim::CatchDetailed
            };
            let handler = st.emit_op(Op::Primitive(handler_prim));
            let opened = st.pop_control()?;
            st.nested_trys -= 1;
            let slot = st.get_address(handler, 0);
            st.words[opened.place].op.set_branch_slot(slot);
            st.add_control(CtrlKind::Catch, jump);
            Ok(())
        }
        "ENDCATCH" => {
            require_proc(st, "ENDCATCH")?;
            match st.innermost_control() {
                Some(CtrlKind::Catch) => {}
                Some(CtrlKind::Begin) | Some(CtrlKind::For) => {
                    return Err(st.abort("Unterminated Loop at ENDCATCH."))
                }
                Some(CtrlKind::If) | Some(CtrlKind::Else) => {
                    return Err(st.abort("Unterminated IF-THEN at ENDCATCH."))
                }
                _ => return Err(st.abort("No CATCH found for ENDCATCH.")),
            }
            let opened = st.pop_control()?;
            let next = st.next_pos();
            let slot = st.get_address(next, 0);
            st.words[opened.place].op.set_branch_slot(slot);
            Ok(())
        }
        "CALL" => {
            require_proc(st, "CALL")?;
            st.emit_op(Op::Primitive(Prim::Call));
            Ok(())
        }
        "PUBLIC" | "WIZCALL" => declare_public(st, upper == "WIZCALL"),
        "VAR" => declare_var(st, false),
        "VAR!" => declare_var(st, true),
        "LVAR" => {
            if st.curr_proc.is_some() {
                return Err(st.abort("Local variable declared within procedure."));
            }
            let Some(tok) = next_token(st)? else {
                return Err(CompileError::eof(st.cursor.lineno, "."));
            };
            st.add_localvar(tok.text())?;
            Ok(())
        }
        _ => Err(st.abort(format!("Unrecognized special form {token}."))),
    }
}

/// `UNTIL` and `REPEAT` both close the innermost loop; UNTIL branches back
/// on false, REPEAT unconditionally.
fn loop_close(st: &mut CompileState, which: &str) -> CompileResult<()> {
    require_proc(st, which)?;
    let kind = match st.innermost_control() {
        Some(kind @ (CtrlKind::Begin | CtrlKind::For)) => kind,
        Some(CtrlKind::Try) => {
            return Err(st.abort(format!("Unterminated TRY-CATCH block at {which}.")))
        }
        Some(CtrlKind::Catch) => {
            return Err(st.abort(format!(
                "Unterminated CATCH-ENDCATCH block at {which}."
            )))
        }
        Some(CtrlKind::If) | Some(CtrlKind::Else) => {
            return Err(st.abort(format!("Unterminated IF-THEN at {which}.")))
        }
        _ => return Err(st.abort(format!("Loop start not found for {which}."))),
    };
    // loop exits land just past the branch emitted below (on the FORPOP
    // when this is a FOR loop)
    let next = st.next_pos();
    let exit_slot = st.get_address(next, 1);
    st.resolve_loop_addrs(exit_slot);

    let opened = st.pop_control()?;
    let top_slot = st.get_address(opened.place, 0);
    if which == "UNTIL" {
        st.emit_op(Op::If(top_slot));
    } else {
        st.emit_op(Op::Jmp(top_slot));
    }
    if kind == CtrlKind::For {
        st.emit_op(Op::Primitive(Prim::ForPop));
    }
    Ok(())
}

/// `: name` and the optional bracketed argument list.
fn proc_start(st: &mut CompileState) -> CompileResult<()> {
    if st.curr_proc.is_some() {
        return Err(st.abort("Definition within definition."));
    }
    let Some(tok) = next_token(st)? else {
        return Err(CompileError::eof(st.cursor.lineno, " within procedure."));
    };
    let mut name = tok.text().to_string();
    let argsflag = name.ends_with('[');
    if argsflag {
        name.pop();
        if name.is_empty() {
            return Err(st.abort("Bad procedure name."));
        }
    }

    let pos = st.emit_op(Op::Function(Rc::new(FuncHeader {
        name: name.clone(),
        vars: 0,
        args: 0,
        var_names: Vec::new(),
    })));
    st.curr_proc = Some(CurrProc {
        pos,
        name: name.clone(),
        vars: 0,
        args: 0,
    });

    if argsflag {
        let mut outflag = false;
        loop {
            let Some(tok) = next_token(st)? else {
                return Err(CompileError::eof(
                    st.cursor.lineno,
                    " within procedure arguments declaration.",
                ));
            };
            let spec = tok.text();
            if spec == "]" {
                break;
            } else if spec == "--" {
                outflag = true;
            } else if !outflag {
                // optional "type:name" annotation; only the name counts
                let varname = spec.rsplit(':').next().unwrap_or(spec);
                if !varname.is_empty() {
                    st.add_scopedvar(varname)?;
                    if let Some(curr) = st.curr_proc.as_mut() {
                        curr.vars += 1;
                        curr.args += 1;
                    }
                }
            }
        }
    }

    st.procs.push(ProcEntry { name, pos });
    Ok(())
}

/// `;` closes the procedure and finalizes its header.
fn proc_end(st: &mut CompileState) -> CompileResult<()> {
    if !st.control.is_empty() {
        return Err(st.abort("Unexpected end of procedure definition."));
    }
    if st.curr_proc.is_none() {
        return Err(st.abort("Procedure end without body."));
    }
    st.emit_op(Op::Ret);
    st.finalize_proc()
}

fn declare_public(st: &mut CompileState, wizflag: bool) -> CompileResult<()> {
    if st.curr_proc.is_some() {
        return Err(st.abort("PUBLIC or WIZCALL declaration within procedure."));
    }
    let Some(tok) = next_token(st)? else {
        return Err(st.abort("Subroutine unknown in PUBLIC or WIZCALL declaration."));
    };
    let name = tok.text().to_string();
    let Some(proc) = st.find_proc(&name) else {
        return Err(st.abort("Subroutine unknown in PUBLIC or WIZCALL declaration."));
    };
    let pos = proc.pos;
    if st
        .publics
        .iter()
        .any(|p| p.name.eq_ignore_ascii_case(&name))
    {
        return Err(st.abort("Function already declared public."));
    }
    let slot = st.get_address(pos, 0);
    st.publics.push(PublicEntry {
        name,
        entry: slot,
        mlev: if wizflag { 4 } else { 1 },
    });
    Ok(())
}

fn declare_var(st: &mut CompileState, bang: bool) -> CompileResult<()> {
    if st.curr_proc.is_some() {
        let Some(tok) = next_token(st)? else {
            return Err(CompileError::eof(st.cursor.lineno, "."));
        };
        let idx = st.add_scopedvar(tok.text())?;
        if let Some(curr) = st.curr_proc.as_mut() {
            curr.vars += 1;
        }
        if bang {
            st.emit_op(Op::SVarBang(idx));
        }
        Ok(())
    } else {
        if bang {
            return Err(st.abort("VAR! used outside of procedure."));
        }
        let Some(tok) = next_token(st)? else {
            return Err(CompileError::eof(st.cursor.lineno, "."));
        };
        st.add_variable(tok.text())?;
        Ok(())
    }
}
