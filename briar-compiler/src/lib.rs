/*!
Compiles YARA-compatible rule files into briar's runtime artifacts.

The compiler consumes an already-parsed rule file ([`ast::RuleFile`];
parsing is the front end's job) and produces, next to the rule file:

- `patterns.txt`: a human-readable table of every extracted pattern
  and its numeric id,
- `rules.def`: the rule program, with every condition lowered to an
  executable expression tree over pre-computed match tables,
- `<rulefile>.regex.db` / `.literal.db` / `.mutex.db`: serialized
  multi-pattern databases ready to be memory-loaded by the scanner.

The pipeline is [`extract`] (strings and mutex regexes → deduplicated
pattern tables with stable ids) → [`compile`] (conditions → rule
program, pattern groups → databases) → [`Compilation::save`].

```
use briar_compiler::ast::{Expression, Rule, RuleFile, StringDef, StringValue};

let file = RuleFile {
    imports: vec![],
    rules: vec![Rule {
        name: "abc".to_string(),
        private: false,
        strings: vec![StringDef {
            identifier: "$s01".to_string(),
            value: StringValue::Plain(b"abc".to_vec()),
        }],
        condition: Expression::Str("$s01".into()),
    }],
};

let compilation = briar_compiler::compile(&file).unwrap();
assert_eq!(compilation.program.pattern_count, 1);
```
*/

use thiserror::Error;

pub mod ast;
mod emit;
pub mod extract;
pub mod hex;
mod lower;

pub use emit::{compile, Compilation};
pub use extract::{extract, Extraction, Pattern, RuleInfo};

/// Anything that can go wrong between a parsed rule file and the
/// artifact set on disk.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("rule `{rule}`: unknown string identifier `{identifier}`")]
    UnknownString { rule: String, identifier: String },
    #[error("rule `{rule}`: unknown mutex pattern `{pattern}`")]
    UnknownMutex { rule: String, pattern: String },
    #[error("rule `{rule}`: unresolved identifier `{name}`")]
    UnknownIdentifier { rule: String, name: String },
    #[error("rule `{rule}`: rule `{name}` is referenced before its definition")]
    ForwardReference { rule: String, name: String },
    #[error("rule `{rule}`: unsupported function call `{function}`")]
    UnsupportedCall { rule: String, function: String },
    #[error("rule `{rule}`: regex literal outside a recognized call")]
    StrayRegex { rule: String },
    #[error("rule `{rule}`: string set is empty")]
    EmptyStringSet { rule: String },
    #[error(transparent)]
    Db(#[from] briar_db::BuildError),
    #[error(transparent)]
    Program(#[from] briar_rules::ProgramError),
    #[error("failed to write compiler artifacts: {0}")]
    Io(#[from] std::io::Error),
}
