//! The immutable configuration bundle threaded through the pipeline (§5, §9
//! Design Notes: "gather module-global mutable options into an immutable
//! `Config` value ... do not keep process-global state").

/// Which protocol's instruction set and gas/type rules the generator and
/// peephole pass should target. Mirrors `--protocol` in §6.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Protocol {
  #[default]
  Mainnet,
  Zeronet,
  Alphanet,
}

/// Output shape for the emitted concrete syntax tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
  /// The lowercase-mnemonic textual form (rendered by the out-of-scope printer).
  #[default]
  Text,
  /// The structured `{prim, args, annots}` JSON form.
  Json,
}

/// Per-invocation configuration, built once by the driver from CLI flags and
/// passed by value (or shared `&Config`) through every call in this crate.
/// Never stored behind a global; see the Design Notes.
#[derive(Clone, Debug)]
pub struct Config {
  pub verbosity: u8,
  pub format: OutputFormat,
  pub compact: bool,
  pub peephole: bool,
  pub type_only: bool,
  pub parse_only: bool,
  pub protocol: Protocol,
  /// `--main NAME`: which contract to treat as the compilation root when a
  /// translation unit defines more than one.
  pub main: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      verbosity: 0,
      format: OutputFormat::default(),
      compact: false,
      peephole: true,
      type_only: false,
      parse_only: false,
      protocol: Protocol::default(),
      main: None,
    }
  }
}

impl Config {
  #[must_use] pub fn is_verbose(&self) -> bool { self.verbosity > 0 }
}
