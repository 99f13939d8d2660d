//! Framer integration tests: negotiation, multi-line assembly, and the
//! serialize/re-parse round trip.

use std::cell::RefCell;
use std::rc::Rc;

use muf_core::RecordedOutput;
use muf_mcp::{McpFrame, McpInput, McpMesg, McpRegistry, McpVer, McpError};

fn registry_with_test_package(received: Rc<RefCell<Vec<McpMesg>>>) -> McpRegistry {
    let mut registry = McpRegistry::new();
    let sink = received.clone();
    registry.register(
        "org-test",
        McpVer::new(1, 0),
        McpVer::new(2, 0),
        Some(Rc::new(move |_frame, _out, mesg, _ver| {
            sink.borrow_mut().push(mesg.clone());
        })),
    );
    registry
}

/// Runs the init handshake; returns the authkey the server generated.
fn handshake(registry: &McpRegistry, frame: &mut McpFrame, out: &mut RecordedOutput) -> String {
    let result = registry
        .process_input(frame, out, "#$#mcp version: \"2.1\" to: \"2.1\"")
        .unwrap();
    assert_eq!(result, McpInput::Handled);
    assert!(frame.enabled);
    frame.authkey.clone().expect("authkey generated")
}

#[test]
fn plain_lines_stay_in_band() {
    let registry = McpRegistry::new();
    let mut frame = McpFrame::new(1);
    let mut out = RecordedOutput::default();

    let result = registry
        .process_input(&mut frame, &mut out, "look around")
        .unwrap();
    assert_eq!(result, McpInput::InBand("look around".to_string()));

    let result = registry
        .process_input(&mut frame, &mut out, "#$\"#$#quoted oob text")
        .unwrap();
    assert_eq!(result, McpInput::InBand("#$#quoted oob text".to_string()));
}

#[test]
fn init_negotiates_and_advertises_packages() {
    let received = Rc::new(RefCell::new(Vec::new()));
    let registry = registry_with_test_package(received);
    let mut frame = McpFrame::new(1);
    let mut out = RecordedOutput::default();

    handshake(&registry, &mut frame, &mut out);
    assert_eq!(frame.version, McpVer::new(2, 1));

    let lines: Vec<&str> = out.descr_lines.iter().map(|(_, l)| l.as_str()).collect();
    assert!(lines[0].starts_with("#$# mcp version: 2.1 to: 2.1"));
    // one `can` per registered package, negotiate included, end terminal
    assert!(lines
        .iter()
        .any(|l| l.contains("mcp-negotiate-can") && l.contains("package: mcp-negotiate")));
    assert!(lines.iter().any(|l| l.contains("mcp-negotiate-can")
        && l.contains("package: org-test")
        && l.contains("min-version: 1.0")
        && l.contains("max-version: 2.0")));
    assert!(lines.last().unwrap().contains("mcp-negotiate-end"));
}

#[test]
fn version_mismatch_leaves_mcp_off() {
    let registry = McpRegistry::new();
    let mut frame = McpFrame::new(1);
    let mut out = RecordedOutput::default();

    registry
        .process_input(&mut frame, &mut out, "#$#mcp version: \"1.0\" to: \"1.0\"")
        .unwrap();
    assert!(!frame.enabled);
    assert!(out.descr_lines.is_empty());
}

#[test]
fn negotiated_package_messages_dispatch() {
    let received = Rc::new(RefCell::new(Vec::new()));
    let registry = registry_with_test_package(received.clone());
    let mut frame = McpFrame::new(1);
    let mut out = RecordedOutput::default();
    let key = handshake(&registry, &mut frame, &mut out);

    // client accepts the package
    registry
        .process_input(
            &mut frame,
            &mut out,
            &format!(
                "#$#mcp-negotiate-can {key} package: org-test min-version: \"1.5\" max-version: \"3.0\""
            ),
        )
        .unwrap();
    assert_eq!(frame.package_version("org-test"), Some(McpVer::new(2, 0)));

    registry
        .process_input(
            &mut frame,
            &mut out,
            &format!("#$#org-test-hello {key} who: \"big world\""),
        )
        .unwrap();

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].package, "org-test");
    assert_eq!(received[0].mesgname, "hello");
    assert_eq!(received[0].arg_line("who"), Some("big world"));
}

#[test]
fn bad_auth_key_is_rejected() {
    let received = Rc::new(RefCell::new(Vec::new()));
    let registry = registry_with_test_package(received.clone());
    let mut frame = McpFrame::new(1);
    let mut out = RecordedOutput::default();
    handshake(&registry, &mut frame, &mut out);

    let result = registry.process_input(
        &mut frame,
        &mut out,
        "#$#org-test-hello wrongkey who: world",
    );
    assert_eq!(result, Err(McpError::BadAuth));
    assert!(received.borrow().is_empty());
}

#[test]
fn multiline_messages_assemble_across_lines() {
    let received = Rc::new(RefCell::new(Vec::new()));
    let registry = registry_with_test_package(received.clone());
    let mut frame = McpFrame::new(1);
    let mut out = RecordedOutput::default();
    let key = handshake(&registry, &mut frame, &mut out);
    registry
        .process_input(
            &mut frame,
            &mut out,
            &format!(
                "#$#mcp-negotiate-can {key} package: org-test min-version: \"1.0\" max-version: \"2.0\""
            ),
        )
        .unwrap();

    registry
        .process_input(
            &mut frame,
            &mut out,
            &format!("#$#org-test-page {key} from: Ember text*: \"\" _data-tag: tag9"),
        )
        .unwrap();
    assert!(received.borrow().is_empty());

    registry
        .process_input(&mut frame, &mut out, "#$#* tag9 text: first line")
        .unwrap();
    registry
        .process_input(&mut frame, &mut out, "#$#* tag9 text: second line")
        .unwrap();
    registry
        .process_input(&mut frame, &mut out, "#$#: tag9")
        .unwrap();

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    let mesg = &received[0];
    assert_eq!(mesg.arg_line("from"), Some("Ember"));
    assert_eq!(mesg.arg_linecount("text"), 2);
    assert_eq!(
        mesg.arg("text").unwrap().lines,
        vec!["first line".to_string(), "second line".to_string()]
    );
}

#[test]
fn continuation_with_unknown_tag_errors() {
    let registry = McpRegistry::new();
    let mut frame = McpFrame::new(1);
    let mut out = RecordedOutput::default();
    handshake(&registry, &mut frame, &mut out);

    let result = registry.process_input(&mut frame, &mut out, "#$#* missing text: x");
    assert!(matches!(result, Err(McpError::UnknownTag { .. })));
}

#[test]
fn serialized_messages_reparse_equivalently() {
    // round trip: server A encodes, server B's framer parses the same
    // message back, multi-line arguments included
    let received = Rc::new(RefCell::new(Vec::new()));
    let registry = registry_with_test_package(received.clone());

    let mut sender = McpFrame::new(1);
    let mut out = RecordedOutput::default();
    let key = handshake(&registry, &mut sender, &mut out);
    sender.set_package_version("org-test", McpVer::new(2, 0));

    let mut original = McpMesg::new("org-test", "page");
    original.arg_append("from", "Ember").unwrap();
    original.arg_append("subject", "two words & a \"quote\"").unwrap();
    original
        .append_line("text", "line one\nline two", false)
        .unwrap();

    let mut wire = RecordedOutput::default();
    sender.output_mesg(&mut wire, &original).unwrap();

    // feed the wire form into a receiving frame negotiated the same way
    let mut receiver = McpFrame::new(2);
    let mut out2 = RecordedOutput::default();
    registry
        .process_input(&mut receiver, &mut out2, "#$#mcp version: \"2.1\" to: \"2.1\"")
        .unwrap();
    receiver.set_package_version("org-test", McpVer::new(2, 0));
    receiver.authkey = Some(key.clone());

    for (_, line) in &wire.descr_lines {
        // replace the sender's auth token with the receiver's expectation
        let patched = line.replace(
            &format!(" {} ", sender.authkey.as_deref().unwrap()),
            &format!(" {key} "),
        );
        registry
            .process_input(&mut receiver, &mut out2, &patched)
            .unwrap();
    }

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    let round_tripped = &received[0];
    assert_eq!(round_tripped.full_name(), original.full_name());
    assert_eq!(round_tripped.arg_line("from"), Some("Ember"));
    assert_eq!(
        round_tripped.arg_line("subject"),
        Some("two words & a \"quote\"")
    );
    // the newline-bearing value traveled as two continuation lines
    assert_eq!(
        round_tripped.arg("text").unwrap().lines,
        vec!["line one".to_string(), "line two".to_string()]
    );
}
