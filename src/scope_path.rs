pub fn normalize(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    if !normalized.starts_with('/') {
        normalized.insert(0, '/');
    }
    normalized
}

pub fn join(parent: &str, name: &str) -> String {
    let parent = normalize(parent);
    if parent == "/" {
        return format!("/{name}");
    }
    format!("{parent}/{name}")
}

pub fn parent(path: &str) -> Option<String> {
    let path = normalize(path);
    if path == "/" {
        return None;
    }
    let index = path.rfind('/')?;
    if index == 0 {
        return Some("/".to_string());
    }
    Some(path[..index].to_string())
}

pub fn is_within_scope(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);

    if path == root {
        return true;
    }

    if root == "/" {
        return true;
    }

    path.starts_with(&(root + "/"))
}

/// Moves `path` from under `old_root` to under `new_root`. Paths outside
/// `old_root` come back unchanged.
pub fn rebase(path: &str, old_root: &str, new_root: &str) -> String {
    let path = normalize(path);
    let old_root = normalize(old_root);
    if path == old_root {
        return normalize(new_root);
    }
    if !is_within_scope(&path, &old_root) {
        return path;
    }
    let suffix = if old_root == "/" {
        &path[1..]
    } else {
        &path[old_root.len() + 1..]
    };
    join(new_root, suffix)
}

/// Every ancestor of `path`, nearest first, ending with `/`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = normalize(path);
    while let Some(p) = parent(&current) {
        result.push(p.clone());
        current = p;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(normalize("/foo/bar/"), "/foo/bar");
        assert_eq!(normalize("/foo//bar///"), "/foo/bar");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("foo"), "/foo");
    }

    #[test]
    fn join_handles_root() {
        assert_eq!(join("/", "a.txt"), "/a.txt");
        assert_eq!(join("/A/", "a.txt"), "/A/a.txt");
    }

    #[test]
    fn parent_of_nested_and_root() {
        assert_eq!(parent("/A/B/c.txt").as_deref(), Some("/A/B"));
        assert_eq!(parent("/A").as_deref(), Some("/"));
        assert_eq!(parent("/"), None);
    }

    #[test]
    fn within_scope_child_path() {
        assert!(is_within_scope("/foo/bar/baz", "/foo/bar"));
        assert!(is_within_scope("/foo/bar", "/foo/bar/"));
        assert!(!is_within_scope("/foo/barbaz", "/foo/bar"));
        assert!(is_within_scope("/anything", "/"));
    }

    #[test]
    fn rebase_moves_descendants_only() {
        assert_eq!(rebase("/A/B/c", "/A/B", "/A/X"), "/A/X/c");
        assert_eq!(rebase("/A/B", "/A/B", "/A/X"), "/A/X");
        assert_eq!(rebase("/A/BB/c", "/A/B", "/A/X"), "/A/BB/c");
        assert_eq!(rebase("/c", "/", "/Z"), "/Z/c");
    }

    #[test]
    fn ancestors_nearest_first() {
        assert_eq!(ancestors("/A/B/c"), vec!["/A/B", "/A", "/"]);
        assert!(ancestors("/").is_empty());
    }
}
