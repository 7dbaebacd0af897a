//! Property-based tests for the text transformations behind the modules
//!
//! These tests verify:
//! - Template rendering is single-pass and leaves plain text alone
//! - Line and block edits are idempotent
//! - Enum string round-trips (parse → to_string → parse)

use proptest::prelude::*;

use hostprep::Variables;
use hostprep::modules::blockinfile::{DEFAULT_MARKER, apply_block};
use hostprep::modules::lineinfile::edit_lines;
use hostprep::modules::parse_mode;
use hostprep::template;
use hostprep::types::{Presence, UfwPolicy, UpgradeMode};
use regex::Regex;

/// Printable text without braces, so it can never form a placeholder
fn plain_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 /._:=#-]{0,40}"
}

fn config_line() -> impl Strategy<Value = String> {
    "[A-Za-z#][A-Za-z0-9 =._-]{0,24}"
}

fn config_file() -> impl Strategy<Value = String> {
    prop::collection::vec(config_line(), 0..12).prop_map(|lines| {
        let mut out = lines.join("\n");
        if !lines.is_empty() {
            out.push('\n');
        }
        out
    })
}

// =============================================================================
// Template rendering
// =============================================================================

proptest! {
    /// Text without placeholders renders to itself
    #[test]
    fn render_leaves_plain_text_alone(text in plain_text()) {
        let rendered = template::render(&text, &Variables::default()).unwrap();
        prop_assert_eq!(rendered, text);
    }

    /// A value that looks like a placeholder is inserted literally
    #[test]
    fn render_is_single_pass(prefix in plain_text(), suffix in plain_text()) {
        let mut vars = Variables::default();
        vars.insert("outer", "{{ inner }}");
        vars.insert("inner", "expanded");

        let input = format!("{}{{{{ outer }}}}{}", prefix, suffix);
        let rendered = template::render(&input, &vars).unwrap();
        prop_assert_eq!(rendered, format!("{}{{{{ inner }}}}{}", prefix, suffix));
    }

    /// Every placeholder is found, whatever the surrounding whitespace
    #[test]
    fn references_tolerate_whitespace(name in "[a-z_][a-z0-9_]{0,12}", left in " {0,3}", right in " {0,3}") {
        let input = format!("x{{{{{}{}{}}}}}y", left, name, right);
        prop_assert_eq!(template::references(&input), vec![name]);
    }
}

// =============================================================================
// Line and block edits
// =============================================================================

proptest! {
    /// Ensuring a line twice changes nothing the second time
    #[test]
    fn edit_lines_is_idempotent(
        content in config_file(),
        value in "[a-z0-9]{1,8}",
    ) {
        let re = Regex::new(r"^#?\s*MaxAuthTries\s").unwrap();
        let line = format!("MaxAuthTries {}", value);
        let once = edit_lines(&content, Some(&re), Some(&line), Presence::Present)
            .unwrap_or(content.clone());
        prop_assert!(once.lines().any(|l| l == line));
        prop_assert_eq!(edit_lines(&once, Some(&re), Some(&line), Presence::Present), None);
    }

    /// Removing twice changes nothing the second time
    #[test]
    fn edit_lines_absent_is_idempotent(content in config_file()) {
        let re = Regex::new("^#").unwrap();
        let once = edit_lines(&content, Some(&re), None, Presence::Absent)
            .unwrap_or(content.clone());
        prop_assert!(once.lines().all(|l| !l.starts_with('#')));
        prop_assert_eq!(edit_lines(&once, Some(&re), None, Presence::Absent), None);
    }

    /// A managed block is inserted once and then left alone
    #[test]
    fn apply_block_is_idempotent(
        content in config_file(),
        block in prop::collection::vec(config_line(), 1..5),
    ) {
        let block = block.join("\n");
        let once = apply_block(&content, &block, DEFAULT_MARKER, Presence::Present)
            .unwrap_or(content.clone());
        prop_assert_eq!(apply_block(&once, &block, DEFAULT_MARKER, Presence::Present), None);

        let removed = apply_block(&once, &block, DEFAULT_MARKER, Presence::Absent)
            .unwrap_or(once.clone());
        prop_assert!(!removed.contains("HOSTPREP MANAGED BLOCK"));
        prop_assert_eq!(apply_block(&removed, &block, DEFAULT_MARKER, Presence::Absent), None);
    }
}

// =============================================================================
// Modes and enums
// =============================================================================

proptest! {
    /// Octal strings with or without a leading zero parse to the same mode
    #[test]
    fn parse_mode_accepts_octal(mode in 0u32..=0o7777) {
        prop_assert_eq!(parse_mode(&format!("{:o}", mode)).unwrap(), mode);
        prop_assert_eq!(parse_mode(&format!("0{:o}", mode)).unwrap(), mode);
    }

    #[test]
    fn parse_mode_rejects_out_of_range(mode in 0o10000u32..0o777777) {
        let octal = format!("{:o}", mode);
        prop_assert!(parse_mode(&octal).is_err());
    }

    #[test]
    fn upgrade_mode_roundtrip(mode in prop_oneof![
        Just(UpgradeMode::Safe),
        Just(UpgradeMode::Full),
        Just(UpgradeMode::Dist),
    ]) {
        let parsed: UpgradeMode = mode.to_string().parse().expect("should parse");
        prop_assert_eq!(mode, parsed);
    }

    #[test]
    fn ufw_policy_roundtrip(policy in prop_oneof![
        Just(UfwPolicy::Allow),
        Just(UfwPolicy::Deny),
        Just(UfwPolicy::Reject),
    ]) {
        let parsed: UfwPolicy = policy.to_string().parse().expect("should parse");
        prop_assert_eq!(policy, parsed);
    }
}
