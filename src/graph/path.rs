use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::name::Name;
use crate::error::{RepographError, Result};
use crate::namespace::NamespaceRegistry;

/// One step of a path: a name plus its 1-based same-name-sibling index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    name: Name,
    index: usize,
}

impl Segment {
    /// Indexes below 1 are raised to 1.
    pub fn new(name: Name, index: usize) -> Self {
        Self {
            name,
            index: index.max(1),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_index(&self) -> bool {
        self.index > 1
    }

    fn render(&self, registry: &dyn NamespaceRegistry) -> String {
        let name = self.name.render_escaped(registry);
        if self.has_index() {
            format!("{}[{}]", name, self.index)
        } else {
            name
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_index() {
            write!(f, "{}[{}]", self.name, self.index)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

#[derive(Debug)]
struct ChildPath {
    parent: Path,
    segment: Segment,
    size: usize,
}

/// Immutable absolute path.
///
/// A non-root path is its parent plus one trailing segment, and parents are shared:
/// `path.parent()` hands back the very parent instance the path was built from.
#[derive(Debug, Clone, Default)]
pub struct Path {
    node: Option<Arc<ChildPath>>,
}

impl Path {
    /// The size-0 root path.
    pub fn root() -> Self {
        Self { node: None }
    }

    pub fn is_root(&self) -> bool {
        self.node.is_none()
    }

    pub fn size(&self) -> usize {
        self.node.as_ref().map_or(0, |node| node.size)
    }

    /// Path of a child with the given name and sibling index.
    pub fn child(&self, name: Name, index: usize) -> Self {
        self.child_segment(Segment::new(name, index))
    }

    pub fn child_segment(&self, segment: Segment) -> Self {
        Self {
            node: Some(Arc::new(ChildPath {
                parent: self.clone(),
                segment,
                size: self.size() + 1,
            })),
        }
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        self.node.as_ref().map(|node| node.parent.clone())
    }

    /// Ancestor `degree` levels up. Degree 0 is the path itself.
    pub fn ancestor(&self, degree: usize) -> Result<Path> {
        if degree == 0 {
            return Ok(self.clone());
        }
        match &self.node {
            None => Err(RepographError::InvalidArgument(format!(
                "degree {} exceeds the size of the root path",
                degree
            ))),
            Some(node) if degree == 1 => Ok(node.parent.clone()),
            Some(node) => node.parent.ancestor(degree - 1).map_err(|_| {
                RepographError::InvalidArgument(format!(
                    "degree {} exceeds path size {}",
                    degree, node.size
                ))
            }),
        }
    }

    /// Segment at position `index` (0-based from the root).
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        let mut current = self.node.as_ref()?;
        if index >= current.size {
            return None;
        }
        loop {
            if index == current.size - 1 {
                return Some(&current.segment);
            }
            current = current.parent.node.as_ref()?;
        }
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.node.as_ref().map(|node| &node.segment)
    }

    /// Segments ordered from the root down.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::with_capacity(self.size());
        let mut current = self.node.as_ref();
        while let Some(node) = current {
            segments.push(node.segment.clone());
            current = node.parent.node.as_ref();
        }
        segments.reverse();
        segments
    }

    /// True if `ancestor` is a strict prefix of this path.
    pub fn is_descendant_of(&self, ancestor: &Path) -> bool {
        match &self.node {
            None => false,
            Some(node) => node.parent == *ancestor || node.parent.is_descendant_of(ancestor),
        }
    }

    pub fn is_at_or_below(&self, other: &Path) -> bool {
        self == other || self.is_descendant_of(other)
    }

    pub fn is_ancestor_of(&self, descendant: &Path) -> bool {
        descendant.is_descendant_of(self)
    }

    /// Deepest path that is at-or-above both paths.
    pub fn common_ancestor(&self, other: &Path) -> Path {
        let mut a = self.clone();
        let mut b = other.clone();
        while a.size() > b.size() {
            a = a.parent().unwrap_or_default();
        }
        while b.size() > a.size() {
            b = b.parent().unwrap_or_default();
        }
        while a != b {
            a = a.parent().unwrap_or_default();
            b = b.parent().unwrap_or_default();
        }
        a
    }

    /// Whether both handles point at the same path instance.
    pub fn same_instance(&self, other: &Path) -> bool {
        match (&self.node, &other.node) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Parse `/a/b[2]/prefix:c`. Names may use the `{uri}local` form, and `\` escapes
    /// `/ : [ ] { } \` inside local names.
    pub fn parse(text: &str, registry: &dyn NamespaceRegistry) -> Result<Path> {
        let body = text.strip_prefix('/').ok_or_else(|| {
            RepographError::InvalidArgument(format!("path '{}' is not absolute", text))
        })?;
        let mut path = Path::root();
        for raw in split_segments(body)? {
            if raw.is_empty() {
                return Err(RepographError::InvalidArgument(format!(
                    "path '{}' contains an empty segment",
                    text
                )));
            }
            let (name_text, index) = split_index(raw, text)?;
            path = path.child(Name::parse_escaped(name_text, registry)?, index);
        }
        Ok(path)
    }

    /// Prefixed form using `registry`. [`Path::parse`] reads it back to an equal path.
    pub fn render(&self, registry: &dyn NamespaceRegistry) -> String {
        if self.is_root() {
            return "/".to_string();
        }
        let mut out = String::new();
        for segment in self.segments() {
            out.push('/');
            out.push_str(&segment.render(registry));
        }
        out
    }
}

fn split_segments(body: &str) -> Result<Vec<&str>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                segments.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&body[start..]);
    Ok(segments)
}

fn split_index<'a>(raw: &'a str, whole: &str) -> Result<(&'a str, usize)> {
    let mut open = None;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '[' => open = Some(i),
            _ => {}
        }
    }
    let Some(open) = open else {
        return Ok((raw, 1));
    };
    let inner = raw[open + 1..].strip_suffix(']').ok_or_else(|| {
        RepographError::InvalidArgument(format!("malformed segment index in '{}'", whole))
    })?;
    let index: usize = inner.parse().map_err(|_| {
        RepographError::InvalidArgument(format!("malformed segment index in '{}'", whole))
    })?;
    if index == 0 {
        return Err(RepographError::InvalidArgument(format!(
            "segment indexes start at 1 in '{}'",
            whole
        )));
    }
    Ok((&raw[..open], index))
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.node.as_ref();
        let mut b = other.node.as_ref();
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Arc::ptr_eq(x, y) {
                        return true;
                    }
                    if x.size != y.size || x.segment != y.segment {
                        return false;
                    }
                    a = x.parent.node.as_ref();
                    b = y.parent.node.as_ref();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.size().hash(state);
        for segment in self.segments() {
            segment.hash(state);
        }
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    /// Document order: parents sort before their children.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.segments().cmp(&other.segments())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for segment in self.segments() {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{SimpleNamespaceRegistry, JCR_URI};

    fn registry() -> SimpleNamespaceRegistry {
        let registry = SimpleNamespaceRegistry::new();
        registry.register("jcr", JCR_URI);
        registry
    }

    fn name(local: &str) -> Name {
        Name::unqualified(local)
    }

    #[test]
    fn test_ancestor_is_same_instance() {
        let abc = Path::root().child(name("a"), 1).child(name("b"), 1).child(name("c"), 1);
        let abcd = abc.child(name("d"), 1);
        let parent = abcd.ancestor(1).unwrap();
        assert!(parent.same_instance(&abc));
        assert_eq!(abcd.segment(abcd.size() - 1), Some(&Segment::new(name("d"), 1)));
        assert_eq!(abcd.ancestor(2).unwrap().to_string(), "/a/b");
        assert_eq!(abcd.ancestor(4).unwrap(), Path::root());
        assert!(abcd.ancestor(5).is_err());
        assert!(abcd.ancestor(0).unwrap().same_instance(&abcd));
    }

    #[test]
    fn test_child_size_is_parent_plus_one() {
        let a = Path::root().child(name("a"), 1);
        let b = a.child(name("b"), 3);
        assert_eq!(Path::root().size(), 0);
        assert_eq!(a.size(), 1);
        assert_eq!(b.size(), 2);
        assert_eq!(b.segment(0), Some(&Segment::new(name("a"), 1)));
        assert_eq!(b.segment(1).map(Segment::index), Some(3));
        assert_eq!(b.segment(2), None);
    }

    #[test]
    fn test_descendant_relationships() {
        let registry = registry();
        let root = Path::root();
        let a = Path::parse("/a", &registry).unwrap();
        let abc = Path::parse("/a/b/c", &registry).unwrap();
        assert!(abc.is_descendant_of(&a));
        assert!(abc.is_descendant_of(&root));
        assert!(a.is_descendant_of(&root));
        assert!(!root.is_descendant_of(&root));
        assert!(!a.is_descendant_of(&a));
        assert!(a.is_at_or_below(&a));
        assert!(a.is_ancestor_of(&abc));
        assert!(!abc.is_descendant_of(&Path::parse("/a/x", &registry).unwrap()));
    }

    #[test]
    fn test_parse_and_render() {
        let registry = registry();
        let path = Path::parse("/Cars/Hybrid[2]/jcr:content", &registry).unwrap();
        assert_eq!(path.size(), 3);
        assert_eq!(path.segment(1).unwrap().index(), 2);
        assert_eq!(path.last_segment().unwrap().name().namespace_uri(), JCR_URI);
        assert_eq!(path.render(&registry), "/Cars/Hybrid[2]/jcr:content");
        assert_eq!(
            path.to_string(),
            format!("/Cars/Hybrid[2]/{{{}}}content", JCR_URI)
        );
        assert_eq!(Path::parse("/", &registry).unwrap(), Path::root());
        assert_eq!(Path::root().render(&registry), "/");
    }

    #[test]
    fn test_parse_expanded_names_with_slashes() {
        let registry = registry();
        let path = Path::parse("/{http://example.com/ns}a/b", &registry).unwrap();
        assert_eq!(path.size(), 2);
        assert_eq!(path.segment(0).unwrap().name().namespace_uri(), "http://example.com/ns");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let registry = registry();
        assert!(Path::parse("relative", &registry).is_err());
        assert!(Path::parse("/a//b", &registry).is_err());
        assert!(Path::parse("/a[0]", &registry).is_err());
        assert!(Path::parse("/a[x]", &registry).is_err());
        assert!(Path::parse("/nope:a", &registry).is_err());
    }

    #[test]
    fn test_metacharacters_in_local_names_round_trip() {
        let registry = registry();
        let root = Path::root().child(name("root"), 1);
        let slash = root.child(name("a/b"), 1);
        let colon = root.child(name("Model:X"), 2);
        let brackets = root.child(name("x[3]"), 1).child(Name::new(JCR_URI, "{c}\\d"), 1);

        assert_eq!(slash.render(&registry), "/root/a\\/b");
        assert_eq!(colon.render(&registry), "/root/Model\\:X[2]");
        for path in [&slash, &colon, &brackets] {
            let parsed = Path::parse(&path.render(&registry), &registry).unwrap();
            assert_eq!(&parsed, path);
            assert_eq!(parsed.size(), path.size());
        }
        assert_eq!(Path::parse("/root/a\\/b", &registry).unwrap().size(), 2);
        assert!(!Path::parse("/root/a/b", &registry).unwrap().is_descendant_of(&slash));
    }

    #[test]
    fn test_index_one_is_implicit() {
        let registry = registry();
        assert_eq!(
            Path::parse("/a[1]/b", &registry).unwrap(),
            Path::parse("/a/b", &registry).unwrap()
        );
    }

    #[test]
    fn test_common_ancestor_and_ordering() {
        let registry = registry();
        let x = Path::parse("/a/b/c", &registry).unwrap();
        let y = Path::parse("/a/b/d/e", &registry).unwrap();
        assert_eq!(x.common_ancestor(&y).to_string(), "/a/b");
        assert!(Path::parse("/a/b", &registry).unwrap() < x);
        assert!(x < y);
    }
}
