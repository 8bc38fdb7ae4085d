//! The external, structured syntax tree (§6 "Target assembly"). This is the
//! `{prim, args, annots}` JSON form; the lowercase-mnemonic textual form is
//! rendered from the same tree by the out-of-scope printer collaborator.

use serde::{Deserialize, Serialize};

/// One node of the concrete syntax tree. This mirrors the target assembly's
/// own four-way split (int literal / string literal / bytes literal /
/// sequence / primitive application) rather than inventing a new shape, so
/// the JSON this produces is exactly the `--json` artifact of §6.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
  Int { int: String },
  String { string: String },
  Bytes { bytes: String },
  Seq(Vec<Node>),
  Prim {
    prim: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    annots: Vec<String>,
  },
}

impl Node {
  #[must_use] pub fn prim(name: impl Into<String>) -> Self {
    Node::Prim { prim: name.into(), args: Vec::new(), annots: Vec::new() }
  }
  #[must_use] pub fn prim_args(name: impl Into<String>, args: Vec<Node>) -> Self {
    Node::Prim { prim: name.into(), args, annots: Vec::new() }
  }
  #[must_use] pub fn with_annot(mut self, annot: String) -> Self {
    if let Node::Prim { annots, .. } = &mut self { annots.push(annot); }
    self
  }
  #[must_use] pub fn int(n: impl ToString) -> Self { Node::Int { int: n.to_string() } }
  #[must_use] pub fn string(s: impl Into<String>) -> Self { Node::String { string: s.into() } }
  #[must_use] pub fn bytes_hex(hex: impl Into<String>) -> Self { Node::Bytes { bytes: hex.into() } }
}

/// A variable-name annotation (`@name`) or field-label annotation (`%field`),
/// per §6 ("Annotations on an instruction are its optional variable name
/// prefixed `@`, or field label prefixed `%`").
#[must_use] pub fn var_annot(name: &str) -> String { format!("@{name}") }
#[must_use] pub fn field_annot(name: &str) -> String { format!("%{name}") }

/// The top-level program: three stanzas, `parameter`/`storage`/`code` (§6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Program {
  pub parameter: Node,
  pub storage: Node,
  pub code: Node,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn json_round_trips_through_serde() {
    let prog = Program {
      parameter: Node::prim("int"),
      storage: Node::prim("int"),
      code: Node::Seq(vec![
        Node::prim("UNPAIR"),
        Node::prim("ADD").with_annot(var_annot("total")),
      ]),
    };
    let json = serde_json::to_string(&prog).unwrap();
    let back: Program = serde_json::from_str(&json).unwrap();
    assert_eq!(prog, back);
  }

  #[test]
  fn annotations_use_at_and_percent_prefixes() {
    assert_eq!(var_annot("x"), "@x");
    assert_eq!(field_annot("balance"), "%balance");
  }
}
