//! Text forms of mapped records.
//!
//! - `lines`: the `name=value` line form used for queue payloads
//! - `export`: JSON, HTML and INI renderings plus field copying

pub mod export;
pub mod lines;

pub use export::{HtmlFormat, copy_fields, from_ini, from_json, to_html, to_ini, to_json};
pub use lines::{decode_lines, encode_lines};
