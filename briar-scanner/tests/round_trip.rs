//! Full-pipeline tests: compile a rule file, write the artifacts,
//! load them back and scan real buffers.

use std::io::Write as _;
use std::path::PathBuf;

use briar_compiler::ast::{
    Expression, HexUnit, IntIterable, Rule, RuleFile, StringDef, StringValue,
};
use briar_rules::{CmpOp, Quant, ReadWidth};
use briar_scanner::{RuleProgram, Scanner};

fn plain(identifier: &str, text: &str) -> StringDef {
    StringDef {
        identifier: identifier.to_string(),
        value: StringValue::Plain(text.as_bytes().to_vec()),
    }
}

fn public(name: &str, strings: Vec<StringDef>, condition: Expression) -> Rule {
    Rule {
        name: name.to_string(),
        private: false,
        strings,
        condition,
    }
}

fn ruleset() -> RuleFile {
    let str_at = |id: &str, at: u64| Expression::StrAt {
        id: id.to_string(),
        at: Expression::Int(at).boxed(),
    };

    // for any i in (0x100 .. filesize) : ( for all of them : ( $ at i ) )
    let co_start = Expression::ForInts {
        quant: Quant::Any,
        var: "i".to_string(),
        iter: IntIterable::Range {
            low: Expression::Int(0x100).boxed(),
            high: Expression::Filesize.boxed(),
        },
        body: Expression::ForStrings {
            quant: Quant::All,
            set: briar_compiler::ast::StringSet::Them,
            body: Expression::StrAt {
                id: "$".to_string(),
                at: Expression::Ident("i".to_string()).boxed(),
            }
            .boxed(),
        }
        .boxed(),
    };

    RuleFile {
        imports: vec!["cuckoo".to_string()],
        rules: vec![
            public(
                "lit",
                vec![plain("$s01", "abc")],
                Expression::Str("$s01".to_string()),
            ),
            public(
                "at_hit",
                vec![plain("$s01", "abc")],
                str_at("$s01", 0x100),
            ),
            public(
                "at_miss",
                vec![plain("$s01", "abc")],
                str_at("$s01", 0x1F0),
            ),
            public(
                "anyof",
                vec![plain("$a", "zzz1"), plain("$b", "zzz2"), plain("$c", "ghi")],
                Expression::Of {
                    quant: Quant::Any,
                    set: briar_compiler::ast::StringSet::Them,
                },
            ),
            public(
                "be16",
                vec![],
                Expression::Cmp {
                    op: CmpOp::Eq,
                    lhs: Expression::Read {
                        width: ReadWidth::W16,
                        signed: false,
                        big_endian: true,
                        at: Expression::Int(0x10).boxed(),
                    }
                    .boxed(),
                    rhs: Expression::Int(0x160).boxed(),
                },
            ),
            public(
                "hexre",
                vec![StringDef {
                    identifier: "$h".to_string(),
                    value: StringValue::Hex(vec![
                        HexUnit::byte(0x61),
                        HexUnit::wildcard(),
                        HexUnit::byte(0x63),
                    ]),
                }],
                Expression::Str("$h".to_string()),
            ),
            public(
                "co_start",
                vec![plain("$a", "abc"), plain("$b", "abcd")],
                co_start,
            ),
            Rule {
                name: "helper".to_string(),
                private: true,
                strings: vec![plain("$h", "abcd")],
                condition: Expression::Str("$h".to_string()),
            },
            public(
                "uses_helper",
                vec![],
                Expression::Ident("helper".to_string()),
            ),
            public(
                "wants_mutex",
                vec![],
                Expression::Call {
                    function: "cuckoo.sync.mutex".to_string(),
                    args: vec![Expression::Regex("^lock_[0-9]+$".to_string())],
                },
            ),
        ],
    }
}

/// `0x200` zeroed bytes with `abc` at 0x100, `abcd` at 0x150, `ghi` at
/// 0x120 and a big-endian 0x0160 at 0x10.
fn sample_buffer() -> Vec<u8> {
    let mut data = vec![0u8; 0x200];
    data[0x10] = 0x01;
    data[0x11] = 0x60;
    data[0x100..0x103].copy_from_slice(b"abc");
    data[0x120..0x123].copy_from_slice(b"ghi");
    data[0x150..0x154].copy_from_slice(b"abcd");
    data
}

fn compile_to_dir(dir: &std::path::Path) -> PathBuf {
    let rule_path = dir.join("ruleset.yar");
    briar_compiler::compile(&ruleset())
        .unwrap()
        .save(&rule_path)
        .unwrap();
    rule_path
}

fn scan_hits(program: &RuleProgram, data: &[u8], mutex: Option<&std::path::Path>) -> Vec<String> {
    let mut hits: Vec<String> = Vec::new();
    {
        let mut scanner = Scanner::builder(program)
            .on_match(|rule: &str, tag: &&str| hits.push(format!("{}: {}", tag, rule)))
            .build();
        scanner.scan_data(data, mutex, &"sample").unwrap();
    }
    hits.sort();
    hits
}

#[test]
fn compile_load_scan() {
    let dir = tempfile::tempdir().unwrap();
    let rule_path = compile_to_dir(dir.path());
    let program = RuleProgram::load(&rule_path).unwrap();

    let hits = scan_hits(&program, &sample_buffer(), None);
    assert_eq!(
        hits,
        vec![
            "sample: anyof",
            "sample: at_hit",
            "sample: be16",
            "sample: co_start",
            "sample: hexre",
            "sample: lit",
            "sample: uses_helper",
        ]
    );
}

#[test]
fn mutex_input_drives_the_mutex_rule() {
    let dir = tempfile::tempdir().unwrap();
    let rule_path = compile_to_dir(dir.path());
    let program = RuleProgram::load(&rule_path).unwrap();

    let report = dir.path().join("report.json");
    std::fs::File::create(&report)
        .unwrap()
        .write_all(br#"{"behavior": {"summary": {"mutexes": ["lock_42", "other"]}}}"#)
        .unwrap();

    let with_mutex = scan_hits(&program, &sample_buffer(), Some(report.as_path()));
    assert!(with_mutex.contains(&"sample: wants_mutex".to_string()));

    // No input at all: equivalent to zero mutex matches, not an error.
    let without = scan_hits(&program, &sample_buffer(), None);
    assert!(!without.contains(&"sample: wants_mutex".to_string()));
}

#[test]
fn scanner_state_resets_between_scans() {
    let dir = tempfile::tempdir().unwrap();
    let rule_path = compile_to_dir(dir.path());
    let program = RuleProgram::load(&rule_path).unwrap();

    let mut hits: Vec<String> = Vec::new();
    let mut scanner = Scanner::builder(&program)
        .on_match(|rule: &str, tag: &&str| hits.push(format!("{}: {}", tag, rule)))
        .build();

    scanner
        .scan_data(&sample_buffer(), None, &"first")
        .unwrap();
    scanner.scan_data(b"nothing to see", None, &"second").unwrap();
    scanner
        .scan_data(&sample_buffer(), None, &"third")
        .unwrap();
    drop(scanner);

    assert!(hits.iter().any(|h| h == "first: lit"));
    assert!(!hits.iter().any(|h| h.starts_with("second:")));
    assert!(hits.iter().any(|h| h == "third: lit"));
}

#[test]
fn private_rules_stay_silent() {
    let dir = tempfile::tempdir().unwrap();
    let rule_path = compile_to_dir(dir.path());
    let program = RuleProgram::load(&rule_path).unwrap();

    let hits = scan_hits(&program, &sample_buffer(), None);
    assert!(!hits.iter().any(|h| h.contains("helper")));
    // But the public rule referencing it still hit.
    assert!(hits.contains(&"sample: uses_helper".to_string()));
}

#[test]
fn compiling_twice_is_bitwise_identical() {
    let first = briar_compiler::compile(&ruleset()).unwrap();
    let second = briar_compiler::compile(&ruleset()).unwrap();
    assert_eq!(first.patterns_txt(), second.patterns_txt());
    assert_eq!(first.program, second.program);
    assert_eq!(
        first.program.to_json().unwrap(),
        second.program.to_json().unwrap()
    );
}

#[test]
fn shift_invariant_holds_in_the_artifacts() {
    let compilation = briar_compiler::compile(&ruleset()).unwrap();
    let regex_count = compilation.extraction.regex_patterns.len() as u32;
    for info in &compilation.extraction.rules {
        for identifier in info.declared() {
            let id = info.string_id(identifier).unwrap();
            assert!(id < compilation.program.pattern_count);
        }
    }
    // Literal-classified strings sit at or above the regex count.
    let lit_id = compilation.extraction.rules[0].string_id("$s01").unwrap();
    assert!(lit_id >= regex_count);
}
