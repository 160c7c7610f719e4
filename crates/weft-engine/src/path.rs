//! Dotted-path lookup into JSON values: `nodes.fetch.items[0].name`.

use serde_json::Value;

/// Look up `path` inside `root`. Segments are separated by `.`; `[n]` indexes arrays.
/// An empty path returns `root`.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in path.split('.') {
        let (key, indices) = split_indices(segment)?;
        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }
        for index in indices {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

/// Split `items[0][2]` into (`items`, [0, 2]).
fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, vec![]));
    };

    let key = &segment[..open];
    let mut indices = Vec::new();
    let mut rest = &segment[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']')?;
        indices.push(stripped[..close].trim().parse().ok()?);
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return None;
    }
    Some((key, indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_keys_and_indices() {
        let v = json!({"nodes": {"fetch": {"items": [{"name": "a"}, {"name": "b"}]}}});
        assert_eq!(lookup(&v, "nodes.fetch.items[1].name"), Some(&json!("b")));
        assert_eq!(lookup(&v, "nodes.fetch.items").map(|v| v.is_array()), Some(true));
    }

    #[test]
    fn empty_path_is_root() {
        let v = json!(5);
        assert_eq!(lookup(&v, ""), Some(&json!(5)));
    }

    #[test]
    fn missing_or_malformed_paths() {
        let v = json!({"a": [1, 2]});
        assert_eq!(lookup(&v, "a[5]"), None);
        assert_eq!(lookup(&v, "b"), None);
        assert_eq!(lookup(&v, "a[x]"), None);
        assert_eq!(lookup(&v, "a[0]junk"), None);
    }

    #[test]
    fn multi_dimensional_index() {
        let v = json!({"grid": [[1, 2], [3, 4]]});
        assert_eq!(lookup(&v, "grid[1][0]"), Some(&json!(3)));
    }
}
