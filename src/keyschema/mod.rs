//! Deterministic encoding of logical keys into lexicographically ordered
//! byte strings (`spec.md` §3, §4.1, §6). Every reserved prefix lives here
//! as a pure function pair: `make_*_key` / `parse_*_key`.

const DELIM: char = ':';
const ESCAPE: char = '%';

/// Percent-escape `:` and `%` so the delimiter stays unambiguous
/// (`original_source/include/index/secondary_index.h::encodeKeyComponent`).
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b':' => out.push_str("%3A"),
            b'%' => out.push_str("%25"),
            0x00..=0x1f => out.push_str(&format!("%{:02X}", b)),
            _ => out.push(b as char),
        }
    }
    out
}

pub fn decode_component(enc: &str) -> String {
    let bytes = enc.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE as u8 && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(val) = u8::from_str_radix(hex, 16) {
                    out.push(val);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Primary entity row key: `<table>:<pk>`.
pub fn entity_key(table: &str, pk: &str) -> String {
    format!("{}:{}", encode_component(table), encode_component(pk))
}

fn make(prefix: &str, components: &[&str]) -> String {
    let mut s = String::from(prefix);
    for c in components {
        s.push(DELIM);
        s.push_str(&encode_component(c));
    }
    s
}

// ---- Equality index: idx:<table>:<column>:<value>:<pk> ----
pub fn idx_key(table: &str, column: &str, value: &str, pk: &str) -> String {
    make("idx", &[table, column, value, pk])
}
pub fn idx_prefix(table: &str, column: &str) -> String {
    make("idx", &[table, column])
}

// ---- Composite: idx:<table>:<col1+col2+..>:<val1>:<val2>:..:<pk> ----
pub fn composite_idx_key(table: &str, columns: &[&str], values: &[&str], pk: &str) -> String {
    let joined_columns = columns.join("+");
    let mut parts: Vec<&str> = vec![table, &joined_columns];
    parts.extend_from_slice(values);
    parts.push(pk);
    make("idx", &parts)
}

// ---- Range: ridx:<table>:<column>:<value>:<pk> ----
pub fn ridx_key(table: &str, column: &str, value: &str, pk: &str) -> String {
    make("ridx", &[table, column, value, pk])
}
pub fn ridx_prefix(table: &str, column: &str) -> String {
    make("ridx", &[table, column])
}
pub fn ridx_value_prefix(table: &str, column: &str, value_prefix: &str) -> String {
    make("ridx", &[table, column, value_prefix])
}

// ---- Sparse: sidx:<table>:<column>:<value>:<pk> ----
pub fn sidx_key(table: &str, column: &str, value: &str, pk: &str) -> String {
    make("sidx", &[table, column, value, pk])
}
pub fn sidx_prefix(table: &str, column: &str) -> String {
    make("sidx", &[table, column])
}

// ---- Secondary geohash list: gidx:<table>:<column>:<geohash>:<pk> ----
pub fn gidx_key(table: &str, column: &str, geohash: &str, pk: &str) -> String {
    make("gidx", &[table, column, geohash, pk])
}
pub fn gidx_prefix(table: &str, column: &str) -> String {
    make("gidx", &[table, column])
}

// ---- TTL: ttlidx:<table>:<column>:<expire-unix-seconds>:<pk> ----
pub fn ttlidx_key(table: &str, column: &str, expire_ts: i64, pk: &str) -> String {
    make("ttlidx", &[table, column, &format!("{:020}", expire_ts.max(0) as u64), pk])
}
pub fn ttlidx_prefix(table: &str, column: &str) -> String {
    make("ttlidx", &[table, column])
}

// ---- Fulltext posting: ftidx:<table>:<column>:<token>:<pk> ----
pub fn ftidx_key(table: &str, column: &str, token: &str, pk: &str) -> String {
    make("ftidx", &[table, column, token, pk])
}
pub fn ftidx_prefix(table: &str, column: &str, token: &str) -> String {
    make("ftidx", &[table, column, token])
}
pub fn ftagg_key(table: &str, column: &str) -> String {
    make("ftagg", &[table, column])
}

// ---- Spatial bucket: spatial:<table>:<morton-hex> ----
pub fn spatial_key(table: &str, morton_hex: &str) -> String {
    make("spatial", &[table, morton_hex])
}
pub fn spatial_prefix(table: &str) -> String {
    make("spatial", &[table])
}
pub fn spatial_config_key(table: &str) -> String {
    make("spatial_config", &[table])
}
pub fn zrange_key(table: &str, z_bucket: i64) -> String {
    make("zrange", &[table, &z_bucket.to_string()])
}

// ---- Graph adjacency: eout:<from>:<edge_id> -> <to>, ein:<to>:<edge_id> -> <from> ----
pub fn eout_key(from: &str, edge_id: &str) -> String {
    make("eout", &[from, edge_id])
}
pub fn eout_prefix(from: &str) -> String {
    make("eout", &[from])
}
pub fn ein_key(to: &str, edge_id: &str) -> String {
    make("ein", &[to, edge_id])
}
pub fn ein_prefix(to: &str) -> String {
    make("ein", &[to])
}
pub fn edge_key(edge_id: &str) -> String {
    make("edge", &[edge_id])
}

// ---- Vector index: hnsw:<table>:<column>:<pk>, hnswmeta:<table>:<column> ----
pub fn hnsw_key(table: &str, column: &str, pk: &str) -> String {
    make("hnsw", &[table, column, pk])
}
pub fn hnsw_prefix(table: &str, column: &str) -> String {
    make("hnsw", &[table, column])
}
pub fn hnswmeta_key(table: &str, column: &str) -> String {
    make("hnswmeta", &[table, column])
}

// ---- Index metadata descriptors ----
pub fn idxmeta_key(table: &str, column: &str) -> String {
    make("idxmeta", &[table, column])
}
pub fn composite_idxmeta_key(table: &str, columns: &[&str]) -> String {
    make("idxmeta", &[table, &columns.join("+")])
}
pub fn ridxmeta_key(table: &str, column: &str) -> String {
    make("ridxmeta", &[table, column])
}
pub fn sidxmeta_key(table: &str, column: &str) -> String {
    make("sidxmeta", &[table, column])
}
pub fn gidxmeta_key(table: &str, column: &str) -> String {
    make("gidxmeta", &[table, column])
}
pub fn ttlidxmeta_key(table: &str, column: &str) -> String {
    make("ttlidxmeta", &[table, column])
}
pub fn ftidxmeta_key(table: &str, column: &str) -> String {
    make("ftidxmeta", &[table, column])
}

pub fn config_key(name: &str) -> String {
    make("config", &[name])
}

/// Split a fully-encoded key on unescaped `:` boundaries and decode each
/// component. Used by scans to recover `(value, pk)` tuples from keys.
pub fn split_key(key: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let bytes = key.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            parts.push(current.clone());
            current.clear();
            i += 1;
        } else if bytes[i] == b'%' && i + 2 < bytes.len() {
            current.push(bytes[i] as char);
            current.push(bytes[i + 1] as char);
            current.push(bytes[i + 2] as char);
            i += 3;
        } else {
            current.push(bytes[i] as char);
            i += 1;
        }
    }
    parts.push(current);
    parts.into_iter().map(|p| decode_component(&p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_roundtrip() {
        let raw = "a:b%c\nd";
        let enc = encode_component(raw);
        assert!(!enc.contains(':') || enc.contains("%3A"));
        assert_eq!(decode_component(&enc), raw);
    }

    #[test]
    fn idx_key_roundtrip_split() {
        let k = idx_key("users", "city", "Berlin", "u1");
        let parts = split_key(&k);
        assert_eq!(parts, vec!["idx", "users", "city", "Berlin", "u1"]);
    }

    #[test]
    fn value_with_colon_does_not_corrupt_boundaries() {
        let k = idx_key("t", "c", "a:b", "pk1");
        let parts = split_key(&k);
        assert_eq!(parts, vec!["idx", "t", "c", "a:b", "pk1"]);
    }

    #[test]
    fn ttl_key_is_zero_padded_for_lexicographic_order() {
        let a = ttlidx_key("t", "c", 5, "pk1");
        let b = ttlidx_key("t", "c", 100, "pk2");
        assert!(a < b);
    }
}
