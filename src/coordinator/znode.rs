use super::super::backend::Backend;
use super::super::backend::CreateMode;
use super::super::ErrorKind;
use super::super::Result;

/// Prefix of exclusive queue nodes (also used by election votes).
pub const EXCLUSIVE_PREFIX: &str = "ex";

/// Prefix of shared queue nodes.
pub const SHARED_PREFIX: &str = "sh";

/// Number of digits the coordination service appends to sequential nodes.
const SEQUENCE_DIGITS: usize = 10;

/// A sequentially-created child node, ordered by its trailing counter.
#[derive(Clone, Eq, PartialEq, Debug)]
pub(crate) struct SequencedNode {
    pub name: String,
    pub prefix: String,
    pub sequence: u64,
}

impl SequencedNode {
    /// Parse a child basename of the form `<prefix><10-digit-counter>`.
    ///
    /// Children that do not follow the sequential naming, such as the
    /// election acknowledgement node, yield `None` and are skipped.
    pub fn parse(name: &str) -> Option<SequencedNode> {
        if name.len() <= SEQUENCE_DIGITS {
            return None;
        }
        let (prefix, digits) = name.split_at(name.len() - SEQUENCE_DIGITS);
        if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        let sequence = digits.parse().ok()?;
        Some(SequencedNode {
            name: name.to_string(),
            prefix: prefix.to_string(),
            sequence,
        })
    }

    pub fn exclusive(&self) -> bool {
        self.prefix == EXCLUSIVE_PREFIX
    }
}

/// Basename of a node path.
pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Escape a user-provided name into a single path component.
pub(crate) fn escape_name(name: &str) -> String {
    name.replace('/', "__")
}

/// List a parent's sequentially-created children in sequence order.
pub(crate) fn sequenced_children(
    backend: &dyn Backend,
    parent: &str,
) -> Result<Vec<SequencedNode>> {
    let children = backend.get_children(parent)?;
    let mut nodes: Vec<SequencedNode> = children
        .iter()
        .filter_map(|name| SequencedNode::parse(name))
        .collect();
    nodes.sort_by(|a, b| a.sequence.cmp(&b.sequence));
    Ok(nodes)
}

/// Outcome of a sequential create attempt.
enum CreateOutcome {
    Created(String),
    MissingParent,
}

fn try_create(
    backend: &dyn Backend,
    parent: &str,
    prefix: &str,
    data: &[u8],
) -> Result<CreateOutcome> {
    let path = format!("{}/{}", parent, prefix);
    let result = backend.create(&path, data.to_vec(), CreateMode::EphemeralSequential);
    match result {
        Ok(created) => Ok(CreateOutcome::Created(created)),
        Err(ref error) if error.kind().is_no_node() => Ok(CreateOutcome::MissingParent),
        Err(error) => Err(error),
    }
}

/// Create a sequential ephemeral child under `parent`, returning its path.
///
/// A missing parent is created recursively and the child creation retried,
/// exactly once.
pub(crate) fn create_sequenced(
    backend: &dyn Backend,
    parent: &str,
    prefix: &str,
    data: &[u8],
) -> Result<String> {
    match try_create(backend, parent, prefix, data)? {
        CreateOutcome::Created(path) => Ok(path),
        CreateOutcome::MissingParent => {
            backend.mkdirp(parent)?;
            match try_create(backend, parent, prefix, data)? {
                CreateOutcome::Created(path) => Ok(path),
                CreateOutcome::MissingParent => Err(ErrorKind::NoNode(parent.to_string()).into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::basename;
    use super::escape_name;
    use super::SequencedNode;

    #[test]
    fn parse_exclusive() {
        let node = SequencedNode::parse("ex0000000010").expect("node to parse");
        assert_eq!(node.prefix, "ex");
        assert_eq!(node.sequence, 10);
        assert!(node.exclusive());
    }

    #[test]
    fn parse_shared() {
        let node = SequencedNode::parse("sh0000000003").expect("node to parse");
        assert_eq!(node.prefix, "sh");
        assert_eq!(node.sequence, 3);
        assert!(!node.exclusive());
    }

    #[test]
    fn parse_rejects_unsequenced_names() {
        assert!(SequencedNode::parse("leader_ack").is_none());
        assert!(SequencedNode::parse("ex123").is_none());
        assert!(SequencedNode::parse("ex00000000ab").is_none());
    }

    #[test]
    fn basename_of_path() {
        assert_eq!(basename("/_zklocking/foo/ex0000000000"), "ex0000000000");
        assert_eq!(basename("top"), "top");
    }

    #[test]
    fn escape_slashes() {
        assert_eq!(escape_name("a/b/c"), "a__b__c");
        assert_eq!(escape_name("plain"), "plain");
    }
}
