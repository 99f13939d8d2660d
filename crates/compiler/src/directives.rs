//! The `$`-directive processor: compile-time defines, conditional
//! compilation, includes, metadata properties, pragmas and compile control.
//!
//! Directives are consumed during token fetch, before define expansion, so a
//! definition can never shadow a directive.

use muf_core::{Dbref, ObjType, ObjectDb, PropValue};

use crate::error::{CompileError, CompileResult};
use crate::state::CompileState;
use crate::token::{CommentMode, RawToken};

/// Property the `$define` export surface lives under.
pub const DEFINES_PROPDIR: &str = "_defs";
/// Property `$version` writes.
pub const VERSION_PROP: &str = "_version";
/// Property `$lib-version` writes.
pub const LIB_VERSION_PROP: &str = "_lib-version";
/// Property `$author` writes.
pub const AUTHOR_PROP: &str = "_author";
/// Property `$doccmd` writes.
pub const DOCCMD_PROP: &str = "_docs";
/// Property `$note` writes.
pub const NOTE_PROP: &str = "_note";

/// Executes one directive; `name` is the token with its `$` stripped.
pub(crate) fn process_directive(st: &mut CompileState, name: &str) -> CompileResult<()> {
    if name.is_empty() {
        return Err(st.abort("I don't understand that compiler directive!"));
    }
    let lowered = name.to_ascii_lowercase();
    match lowered.as_str() {
        "define" => dir_define(st),
        "enddef" => Err(st.abort("$enddef without a previous matching $define.")),
        "def" => dir_def(st),
        "undef" => {
            let tok = raw_or_eof(st, "looking for name to $undef.")?;
            st.defines.remove(tok.text());
            Ok(())
        }
        "cleardefs" => dir_cleardefs(st),
        "pubdef" => dir_pubdef(st),
        "libdef" => dir_libdef(st),
        "include" => dir_include(st),
        "echo" => {
            let text = st.cursor.rest_of_line();
            let player = st.player;
            st.output.notify(player, &text);
            Ok(())
        }
        "abort" => {
            let text = st.cursor.rest_of_line();
            let message = if text.is_empty() {
                "Forced abort for the compile.".to_string()
            } else {
                text
            };
            Err(CompileError::Aborted {
                line: st.cursor.lineno,
                message,
            })
        }
        "version" => dir_version(st, VERSION_PROP),
        "lib-version" => dir_version(st, LIB_VERSION_PROP),
        "author" => dir_rest_prop(st, AUTHOR_PROP),
        "doccmd" => dir_rest_prop(st, DOCCMD_PROP),
        "note" => dir_rest_prop(st, NOTE_PROP),
        "ifdef" => dir_ifdef(st, false),
        "ifndef" => dir_ifdef(st, true),
        "ifver" => dir_ifver(st, VERSION_PROP, false),
        "ifnver" => dir_ifver(st, VERSION_PROP, true),
        "iflibver" => dir_ifver(st, LIB_VERSION_PROP, false),
        "ifnlibver" => dir_ifver(st, LIB_VERSION_PROP, true),
        "iflib" => dir_iflib(st, false),
        "ifnlib" => dir_iflib(st, true),
        "ifcancall" => dir_ifcancall(st, false),
        "ifncancall" => dir_ifcancall(st, true),
        "else" => {
            // reached only from a taken branch: skip the alternative
            skip_branch(st, false)?;
            Ok(())
        }
        "endif" => Ok(()),
        "pragma" => dir_pragma(st),
        "entrypoint" => dir_entrypoint(st),
        "language" => dir_language(st),
        _ => Err(st.abort("I don't understand that compiler directive!")),
    }
}

fn raw_or_eof(st: &mut CompileState, context: &str) -> CompileResult<RawToken> {
    match st.cursor.next_token_raw()? {
        Some(tok) => Ok(tok),
        None => Err(CompileError::eof(
            st.cursor.lineno,
            format!(" {context}"),
        )),
    }
}

/// True when the token opens a nested conditional block.
fn is_conditional(word: &str) -> bool {
    let Some(rest) = word.strip_prefix('$') else {
        return false;
    };
    [
        "ifdef",
        "ifndef",
        "iflib",
        "ifnlib",
        "ifver",
        "iflibver",
        "ifnver",
        "ifnlibver",
        "ifcancall",
        "ifncancall",
    ]
    .iter()
    .any(|c| c.eq_ignore_ascii_case(rest))
}

/// Skips a conditional branch. With `stop_at_else`, an `$else` at depth
/// zero ends the skip (the else-branch will then compile); a depth-zero
/// `$endif` always does.
fn skip_branch(st: &mut CompileState, stop_at_else: bool) -> CompileResult<()> {
    let mut depth = 0i32;
    loop {
        let Some(tok) = st.cursor.next_token_raw()? else {
            return Err(CompileError::eof(
                st.cursor.lineno,
                " in $ifdef clause.",
            ));
        };
        let Some(word) = tok.as_word() else { continue };
        if depth == 0 {
            if word.eq_ignore_ascii_case("$endif") {
                return Ok(());
            }
            if stop_at_else && word.eq_ignore_ascii_case("$else") {
                return Ok(());
            }
        }
        if is_conditional(word) {
            depth += 1;
        } else if word.eq_ignore_ascii_case("$endif") {
            depth -= 1;
        }
    }
}

/// Serializes a raw token back into source form; strings are re-quoted with
/// their escapes re-applied so the definition re-lexes identically.
fn requote(tok: &RawToken) -> String {
    match tok {
        RawToken::Word(w) => w.clone(),
        RawToken::Str(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for ch in s.chars() {
                if ch == '"' || ch == '\\' {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('"');
            out
        }
    }
}

fn dir_define(st: &mut CompileState) -> CompileResult<()> {
    let name = raw_or_eof(st, "looking for $define name.")?;
    let mut definition = String::new();
    loop {
        let Some(tok) = st.cursor.next_token_raw()? else {
            return Err(CompileError::eof(
                st.cursor.lineno,
                " in $define definition.",
            ));
        };
        if tok.as_word().is_some_and(|w| w.eq_ignore_ascii_case("$enddef")) {
            break;
        }
        if !definition.is_empty() {
            definition.push(' ');
        }
        definition.push_str(&requote(&tok));
        if definition.len() > 2048 {
            return Err(st.abort("$define definition too long."));
        }
    }
    st.defines.insert(name.text(), definition);
    Ok(())
}

fn dir_def(st: &mut CompileState) -> CompileResult<()> {
    let name = raw_or_eof(st, "looking for $def name.")?;
    let definition = st.cursor.rest_of_line();
    st.defines.insert(name.text(), definition);
    Ok(())
}

fn dir_cleardefs(st: &mut CompileState) -> CompileResult<()> {
    st.defines.clear();
    let arg = st.cursor.rest_of_line();
    let owner = st.db.owner(st.program);
    let owner_mlev = st.db.mlevel(owner);
    // builtins always come back; property defines return unless a wizard
    // asked for a truly clean slate
    seed_builtin_defines(st);
    if arg.is_empty() || owner_mlev < 4 {
        st.defines.sweep_props(st.db, owner);
        st.defines.sweep_props(st.db, Dbref(0));
    }
    Ok(())
}

/// Installs the compiler's built-in defines.
fn seed_builtin_defines(st: &mut CompileState) {
    st.defines.insert("__version", env!("CARGO_PKG_VERSION"));
    st.defines.insert("__muckname", st.db.name(Dbref(0)));
    st.defines.insert_int("__fuzzball__", 1);
    st.defines
        .insert_int("max_variable_count", muf_config::MAX_VAR as i64);

    // array and list conveniences
    st.defines.insert("}array", "} array_make");
    st.defines.insert("}list", "} array_make");
    st.defines.insert("}dict", "} 2 / array_make_dict");
    st.defines.insert("[]", "array_getitem");
    st.defines.insert("->[]", "array_setitem");
    st.defines.insert("[]<-", "array_appenditem");

    // case support
    st.defines.insert("case", "begin dup");
    st.defines.insert("when", "if pop");
    st.defines.insert("end", "break then dup");
    st.defines.insert("default", "pop 1 if");
    st.defines.insert("endcase", "pop pop 1 until");

    st.defines
        .insert("event_wait", "0 array_make event_waitfor");
}

/// Seeds a fresh compile's define table: builtins, then the `_defs/`
/// sweeps off object #0 and the program's owner (owner entries shadow the
/// global set).
pub(crate) fn seed_defines(st: &mut CompileState) {
    seed_builtin_defines(st);
    st.defines.sweep_props(st.db, Dbref(0));
    let owner = st.db.owner(st.program);
    if owner != Dbref(0) {
        st.defines.sweep_props(st.db, owner);
    }
}

fn valid_prop_name(name: &str) -> bool {
    !name.contains('/') && !name.contains(':') && !name.starts_with(['@', '~'])
}

fn dir_pubdef(st: &mut CompileState) -> CompileResult<()> {
    let tok = raw_or_eof(st, "looking for $pubdef name.")?;
    let mut name = tok.text().to_string();

    if name == ":" {
        let program = st.program;
        for (entry, _) in st.db.prop_dir_entries(program, &format!("{DEFINES_PROPDIR}/")) {
            st.db
                .remove_prop(program, &format!("{DEFINES_PROPDIR}/{entry}"));
        }
        st.cursor.rest_of_line();
        return Ok(());
    }

    // the \name form only sets the property when it is not already present
    let only_if_absent = name.starts_with('\\');
    if only_if_absent {
        name.remove(0);
    }
    if !valid_prop_name(&name) {
        return Err(st.abort("Invalid $pubdef name.  No /, :, @ nor ~ are allowed."));
    }

    let value = st.cursor.rest_of_line();
    let propname = format!("{DEFINES_PROPDIR}/{name}");
    let program = st.program;
    if only_if_absent && st.db.get_prop(program, &propname).is_some() {
        return Ok(());
    }
    if value.is_empty() {
        st.db.remove_prop(program, &propname);
    } else {
        st.db.set_prop(program, &propname, PropValue::Str(value));
    }
    Ok(())
}

fn dir_libdef(st: &mut CompileState) -> CompileResult<()> {
    let tok = raw_or_eof(st, "looking for $libdef name.")?;
    let mut name = tok.text().to_string();
    let only_if_absent = name.starts_with('\\');
    if only_if_absent {
        name.remove(0);
    }
    if !valid_prop_name(&name) {
        return Err(st.abort("Invalid $libdef name.  No /, :, @ nor ~ are allowed."));
    }

    st.cursor.rest_of_line();
    let propname = format!("{DEFINES_PROPDIR}/{name}");
    let program = st.program;
    if only_if_absent && st.db.get_prop(program, &propname).is_some() {
        return Ok(());
    }
    let defstr = format!("{} \"{}\" call", program, name);
    st.db.set_prop(program, &propname, PropValue::Str(defstr));
    Ok(())
}

/// Resolves an object spec the way directives match one: `this`, `me`,
/// an absolute `#n`, or a `$registered` name off object #0.
fn resolve_object(st: &CompileState, spec: &str) -> Option<Dbref> {
    let obj = if spec.eq_ignore_ascii_case("this") {
        st.program
    } else if spec.eq_ignore_ascii_case("me") {
        st.player
    } else if let Ok(obj) = spec.parse::<Dbref>() {
        obj
    } else if let Some(reg) = spec.strip_prefix('$') {
        match st.db.get_prop(Dbref(0), &format!("_reg/{reg}"))? {
            PropValue::Ref(obj) => obj,
            PropValue::Str(text) => text.parse().ok()?,
            _ => return None,
        }
    } else {
        return None;
    };
    st.db.valid(obj).then_some(obj)
}

fn dir_include(st: &mut CompileState) -> CompileResult<()> {
    let tok = raw_or_eof(st, "while doing $include.")?;
    let Some(obj) = resolve_object(st, tok.text()) else {
        return Err(st.abort("I don't understand what object you want to $include."));
    };
    st.defines.sweep_props(st.db, obj);
    Ok(())
}

fn dir_version(st: &mut CompileState, prop: &str) -> CompileResult<()> {
    let tok = raw_or_eof(st, "while doing $version.")?;
    let text = tok.text();
    if text.parse::<f64>().is_err() {
        return Err(st.abort("Expected a floating point number for the version."));
    }
    let program = st.program;
    st.db
        .set_prop(program, prop, PropValue::Str(text.to_string()));
    st.cursor.rest_of_line();
    Ok(())
}

fn dir_rest_prop(st: &mut CompileState, prop: &str) -> CompileResult<()> {
    let text = st.cursor.rest_of_line();
    let program = st.program;
    st.db.set_prop(program, prop, PropValue::Str(text));
    Ok(())
}

fn dir_ifdef(st: &mut CompileState, invert: bool) -> CompileResult<()> {
    let tok = raw_or_eof(st, "looking for $ifdef condition.")?;
    let condition = tok.text().to_string();

    // locate a comparator after the first character so operator-named
    // defines still test cleanly
    let split = condition
        .char_indices()
        .skip(1)
        .find(|&(_, c)| matches!(c, '=' | '<' | '>'));
    let (name, cmp, value) = match split {
        Some((at, op)) => (
            &condition[..at],
            Some(op),
            &condition[at + op.len_utf8()..],
        ),
        None => (condition.as_str(), None, ""),
    };

    let definition = st.defines.get(name).map(|s| s.to_string());
    let mut skip = match (cmp, definition) {
        (None, def) => def.is_none(),
        (Some(_), None) => true,
        (Some(op), Some(def)) => {
            let ord = def.to_ascii_lowercase().cmp(&value.to_ascii_lowercase());
            let holds = match op {
                '=' => ord.is_eq(),
                '>' => ord.is_gt(),
                _ => ord.is_lt(),
            };
            !holds
        }
    };
    if invert {
        skip = !skip;
    }
    if skip {
        skip_branch(st, true)?;
    }
    Ok(())
}

fn dir_ifver(st: &mut CompileState, prop: &str, invert: bool) -> CompileResult<()> {
    let tok = raw_or_eof(st, "while doing $ifver.")?;
    let Some(obj) = resolve_object(st, tok.text()) else {
        return Err(st.abort("I don't understand what object you want to check with $ifver."));
    };
    let stored = st
        .db
        .get_prop(obj, prop)
        .map(|v| v.as_str())
        .unwrap_or_else(|| "0.0".to_string());
    let wanted = raw_or_eof(st, "while doing $ifver.")?;
    let stored: f64 = stored.parse().unwrap_or(0.0);
    let wanted: f64 = wanted.text().parse().unwrap_or(0.0);
    st.cursor.rest_of_line();

    let mut ok = wanted <= stored;
    if invert {
        ok = !ok;
    }
    if !ok {
        skip_branch(st, true)?;
    }
    Ok(())
}

fn dir_iflib(st: &mut CompileState, invert: bool) -> CompileResult<()> {
    let tok = raw_or_eof(st, "while doing $iflib.")?;
    let mut ok = matches!(
        resolve_object(st, tok.text()),
        Some(obj) if st.db.obj_type(obj) == ObjType::Program
    );
    if invert {
        ok = !ok;
    }
    if !ok {
        skip_branch(st, true)?;
    }
    Ok(())
}

fn dir_ifcancall(st: &mut CompileState, invert: bool) -> CompileResult<()> {
    let tok = raw_or_eof(st, "for ifcancall.")?;
    let Some(obj) = resolve_object(st, tok.text()) else {
        return Err(st.abort("I don't understand what program you want to check in ifcancall."));
    };
    let func = raw_or_eof(st, "for ifcancall.")?;
    let func = func.text().to_string();
    st.cursor.rest_of_line();

    let mut ok = st
        .publics_view
        .map(|view| view.can_call(st.player, obj, &func))
        .unwrap_or(false);
    if invert {
        ok = !ok;
    }
    if !ok {
        skip_branch(st, true)?;
    }
    Ok(())
}

fn dir_pragma(st: &mut CompileState) -> CompileResult<()> {
    let Some(tok) = st.cursor.next_token_raw()? else {
        return Err(st.abort("Pragma requires at least one argument."));
    };
    let pragma = tok.text().to_string();
    if pragma.eq_ignore_ascii_case("comment_strict") {
        st.cursor.comment_mode = CommentMode::Flat;
    } else if pragma.eq_ignore_ascii_case("comment_recurse") {
        st.cursor.comment_mode = CommentMode::Recursive;
    } else if pragma.eq_ignore_ascii_case("comment_loose") {
        st.cursor.comment_mode = CommentMode::Loose;
    } else {
        return Err(CompileError::BadPragma {
            line: st.cursor.lineno,
            pragma,
        });
    }
    Ok(())
}

fn dir_entrypoint(st: &mut CompileState) -> CompileResult<()> {
    let Some(tok) = st.cursor.next_token_raw()? else {
        return Err(st.abort("$entrypoint - function name is required."));
    };
    let name = tok.text().to_string();
    if st.find_proc(&name).is_none() {
        return Err(st.abort(format!(
            "$entrypoint - unrecognized function name '{name}'."
        )));
    }
    st.entrypoint = Some(name);
    Ok(())
}

fn dir_language(st: &mut CompileState) -> CompileResult<()> {
    let Some(tok) = st.cursor.next_token_raw()? else {
        return Err(st.abort("$language - argument is required."));
    };
    match &tok {
        RawToken::Str(lang) if lang.eq_ignore_ascii_case("muf") => Ok(()),
        RawToken::Str(lang) => Err(st.abort(format!(
            "$language - '{lang}' is not implemented on this server."
        ))),
        RawToken::Word(_) => {
            Err(st.abort("$language - argument must be enclosed in double quotes."))
        }
    }
}
