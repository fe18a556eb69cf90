// SPDX-License-Identifier: MIT OR Apache-2.0
//! C source generation: the asset registry and the entry trampoline.
//!
//! Both emitters are deterministic; the trampoline template hash is taken
//! before substitution and recorded in the signed bundle.

use crate::assets::Asset;
use std::fmt::Write as _;

/// The fixed entry-point template. `@APP_NAME@` and `@ASSET_COUNT@` are
/// the only substitution points.
pub const TRAMPOLINE_TEMPLATE: &str = r#"/* hull entry trampoline */
#include <stddef.h>

struct hull_asset {
  const char *name;
  const unsigned char *data;
  size_t len;
};

extern const struct hull_asset hull_assets[];
extern const size_t hull_asset_count;

int hull_platform_main(const char *app_name,
                       const struct hull_asset *assets,
                       size_t asset_count,
                       int argc, char **argv);

int main(int argc, char **argv) {
  return hull_platform_main("@APP_NAME@", hull_assets, @ASSET_COUNT@, argc, argv);
}
"#;

/// Hex SHA-256 of the template before substitution.
#[must_use]
pub fn trampoline_template_hash() -> String {
    hull_canon::sha256_hex(TRAMPOLINE_TEMPLATE.as_bytes())
}

/// Instantiate the trampoline for an app.
#[must_use]
pub fn trampoline_source(app_name: &str, asset_count: usize) -> String {
    TRAMPOLINE_TEMPLATE
        .replace("@APP_NAME@", &c_escape(app_name))
        .replace("@ASSET_COUNT@", &asset_count.to_string())
}

/// Emit the registry: one static array entry per collected asset.
#[must_use]
pub fn registry_source(assets: &[Asset]) -> String {
    let mut out = String::from("/* hull asset registry (generated) */\n#include <stddef.h>\n\n");
    out.push_str(
        "struct hull_asset { const char *name; const unsigned char *data; size_t len; };\n\n",
    );

    for (i, asset) in assets.iter().enumerate() {
        let _ = writeln!(
            out,
            "static const unsigned char hull_asset_{i}[] = {{{}}};",
            hex_bytes(&asset.bytes)
        );
    }

    out.push_str("\nconst struct hull_asset hull_assets[] = {\n");
    for (i, asset) in assets.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {{\"{}\", hull_asset_{i}, {}}},",
            c_escape(&asset.logical_name),
            asset.bytes.len()
        );
    }
    out.push_str("};\n");
    let _ = writeln!(out, "const size_t hull_asset_count = {};", assets.len());
    out
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 5);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "0x{byte:02x}");
    }
    out
}

fn c_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c => {
                for byte in c.to_string().as_bytes() {
                    let _ = write!(out, "\\x{byte:02x}");
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str, bytes: &[u8]) -> Asset {
        Asset {
            logical_name: name.into(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn template_hash_is_stable_across_substitution() {
        let before = trampoline_template_hash();
        let _instantiated = trampoline_source("blog", 3);
        assert_eq!(trampoline_template_hash(), before);
    }

    #[test]
    fn trampoline_substitutes_both_points() {
        let src = trampoline_source("blog", 3);
        assert!(src.contains("\"blog\""));
        assert!(src.contains("hull_assets, 3,"));
        assert!(!src.contains("@APP_NAME@"));
        assert!(!src.contains("@ASSET_COUNT@"));
    }

    #[test]
    fn registry_emits_one_entry_per_asset() {
        let src = registry_source(&[asset("a.js", b"ab"), asset("b.js", b"c")]);
        assert!(src.contains("hull_asset_0[] = {0x61,0x62}"));
        assert!(src.contains("hull_asset_1[] = {0x63}"));
        assert!(src.contains("{\"a.js\", hull_asset_0, 2},"));
        assert!(src.contains("hull_asset_count = 2;"));
    }

    #[test]
    fn registry_is_deterministic() {
        let assets = vec![asset("x.js", b"bytes"), asset("y.js", &[0, 255, 7])];
        assert_eq!(registry_source(&assets), registry_source(&assets));
    }

    #[test]
    fn names_are_escaped() {
        let src = registry_source(&[asset("weird\"name.js", b"x")]);
        assert!(src.contains("weird\\\"name.js"));
    }
}
