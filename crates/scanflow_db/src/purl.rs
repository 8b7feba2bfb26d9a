//! Package-URL helpers: qualifier normalization and purl assembly.
//!
//! Scan importers hand us qualifiers either as an encoded string
//! (`"classifier=sources&repository_url=..."`) or as a mapping. Both forms
//! are reduced to one canonical encoded string so package records compare
//! and display consistently.

use serde_json::Value;
use std::collections::BTreeMap;

/// Normalize package-URL qualifiers to their canonical encoded string form.
///
/// Keys are percent-decoded and lower-cased, values percent-decoded; pairs
/// with an empty key or value are dropped, the rest are sorted by key and
/// re-encoded. Returns `None` when nothing remains. Normalization is
/// idempotent: feeding the output back in returns it unchanged.
pub fn normalize_qualifiers(value: &Value) -> Option<String> {
    let mut pairs: BTreeMap<String, String> = BTreeMap::new();

    match value {
        Value::String(encoded) => {
            for chunk in encoded.split('&') {
                if let Some((key, val)) = chunk.split_once('=') {
                    insert_pair(&mut pairs, key, val);
                }
            }
        }
        Value::Object(map) => {
            for (key, val) in map {
                let val = match val {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                insert_pair(&mut pairs, key, &val);
            }
        }
        _ => return None,
    }

    if pairs.is_empty() {
        return None;
    }

    let encoded = pairs
        .iter()
        .map(|(key, val)| format!("{}={}", percent_encode(key), percent_encode(val)))
        .collect::<Vec<_>>()
        .join("&");
    Some(encoded)
}

fn insert_pair(pairs: &mut BTreeMap<String, String>, key: &str, val: &str) {
    let key = percent_decode(key).to_lowercase();
    let val = percent_decode(val);
    if key.is_empty() || val.is_empty() {
        return;
    }
    pairs.insert(key, val);
}

/// Assemble a `pkg:` URL from its components. `ptype` and `name` are
/// required; everything else is appended only when present.
pub fn build_package_url(
    ptype: &str,
    namespace: &str,
    name: &str,
    version: &str,
    qualifiers: &str,
    subpath: &str,
) -> Option<String> {
    if ptype.is_empty() || name.is_empty() {
        return None;
    }

    let mut purl = format!("pkg:{}/", ptype);
    if !namespace.is_empty() {
        purl.push_str(namespace);
        purl.push('/');
    }
    purl.push_str(name);
    if !version.is_empty() {
        purl.push('@');
        purl.push_str(version);
    }
    if !qualifiers.is_empty() {
        purl.push('?');
        purl.push_str(qualifiers);
    }
    if !subpath.is_empty() {
        purl.push('#');
        purl.push_str(subpath);
    }
    Some(purl)
}

/// Percent-encode everything outside the unreserved set.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Percent-decode `%XX` sequences; malformed sequences are kept literally.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_from_mapping() {
        let qualifiers = json!({"classifier": "SOURCES"});
        assert_eq!(
            normalize_qualifiers(&qualifiers),
            Some("classifier=SOURCES".to_string())
        );
    }

    #[test]
    fn test_normalize_lowercases_keys_and_sorts() {
        let qualifiers = json!({"Repository_URL": "http://example.com", "Arch": "x86_64"});
        assert_eq!(
            normalize_qualifiers(&qualifiers),
            Some("arch=x86_64&repository_url=http%3A%2F%2Fexample.com".to_string())
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let qualifiers = json!({"classifier": "SOURCES", "repository_url": "http://example.com/a b"});
        let once = normalize_qualifiers(&qualifiers).unwrap();
        let twice = normalize_qualifiers(&Value::String(once.clone())).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_drops_empty_pairs() {
        let qualifiers = json!({"classifier": "", "": "x"});
        assert_eq!(normalize_qualifiers(&qualifiers), None);
    }

    #[test]
    fn test_normalize_from_encoded_string() {
        let qualifiers = Value::String("b=2&a=1".to_string());
        assert_eq!(normalize_qualifiers(&qualifiers), Some("a=1&b=2".to_string()));
    }

    #[test]
    fn test_build_package_url() {
        assert_eq!(
            build_package_url("maven", "org.apache", "commons-io", "2.11.0", "", ""),
            Some("pkg:maven/org.apache/commons-io@2.11.0".to_string())
        );
        assert_eq!(
            build_package_url("pypi", "", "requests", "2.31.0", "classifier=SOURCES", "src"),
            Some("pkg:pypi/requests@2.31.0?classifier=SOURCES#src".to_string())
        );
        assert_eq!(build_package_url("", "", "requests", "", "", ""), None);
    }
}
