//! The shape of an `import` directive.
//!
//! All three accepted syntaxes fold into one [`ImportTree`]:
//!
//! ```text
//! import a::b::{c, d::e};        // gleam style, :: or / separators
//! import foo(u32) as f from ./file1;
//! #import foo(u32) as f from ./file1
//! ```

use std::fmt;

/// One `import` directive: a path of segments ending in one or more leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTree {
    /// Path segments, outermost first. The last segment holds the leaves.
    pub segments: Vec<Segment>,
}

/// A step in an import path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `name`, optionally `name(args)` and `name as alias` on a leaf.
    Simple(SimpleSegment),
    /// `{a, b::c}`: a branch point holding whole subtrees.
    List(Vec<ImportTree>),
}

/// A plain path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleSegment {
    /// Exporter-side name of this segment.
    pub name: String,
    /// Instantiation arguments, only meaningful on a leaf.
    pub args: Option<Vec<String>>,
    /// `as` rename, only meaningful on a leaf.
    pub as_name: Option<String>,
}

impl SimpleSegment {
    /// A bare segment with no arguments and no rename.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), args: None, as_name: None }
    }
}

/// One leaf of a flattened [`ImportTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatImport {
    /// The name by which the importing module refers to the export.
    pub imp_name: String,
    /// Exporter-side path, module segments then the export's name.
    pub exp_segments: Vec<String>,
    /// Instantiation arguments for the export's type parameters.
    pub args: Option<Vec<String>>,
}

impl ImportTree {
    /// A linear tree from one path of simple segments.
    #[must_use]
    pub fn from_path(segments: Vec<SimpleSegment>) -> Self {
        Self { segments: segments.into_iter().map(Segment::Simple).collect() }
    }

    /// Expand branch points into the full set of leaf imports.
    #[must_use]
    pub fn flatten(&self) -> Vec<FlatImport> {
        let mut flat = Vec::new();
        flatten_into(&self.segments, &mut Vec::new(), &mut flat);
        flat
    }
}

fn flatten_into(segments: &[Segment], prefix: &mut Vec<String>, out: &mut Vec<FlatImport>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match head {
        Segment::Simple(simple) if rest.is_empty() => {
            let mut exp_segments = prefix.clone();
            exp_segments.push(simple.name.clone());
            out.push(FlatImport {
                imp_name: simple.as_name.clone().unwrap_or_else(|| simple.name.clone()),
                exp_segments,
                args: simple.args.clone(),
            });
        }
        Segment::Simple(simple) => {
            prefix.push(simple.name.clone());
            flatten_into(rest, prefix, out);
            prefix.pop();
        }
        Segment::List(branches) => {
            for branch in branches {
                flatten_into(&branch.segments, prefix, out);
            }
        }
    }
}

impl fmt::Display for ImportTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("::")?;
            }
            match segment {
                Segment::Simple(simple) => {
                    f.write_str(&simple.name)?;
                    if let Some(args) = &simple.args {
                        write!(f, "({})", args.join(", "))?;
                    }
                    if let Some(as_name) = &simple.as_name {
                        write!(f, " as {as_name}")?;
                    }
                }
                Segment::List(branches) => {
                    f.write_str("{")?;
                    for (j, branch) in branches.iter().enumerate() {
                        if j > 0 {
                            f.write_str(", ")?;
                        }
                        branch.fmt(f)?;
                    }
                    f.write_str("}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn leaf(name: &str) -> SimpleSegment {
        SimpleSegment::named(name)
    }

    #[test]
    fn linear_path_has_one_leaf() {
        let tree = ImportTree::from_path(vec![leaf("a"), leaf("b"), leaf("c")]);
        let flat = tree.flatten();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].imp_name, "c");
        assert_eq!(flat[0].exp_segments, ["a", "b", "c"]);
    }

    #[test]
    fn branch_lists_expand_every_leaf() {
        // import a::{c, d::e};
        let tree = ImportTree {
            segments: vec![
                Segment::Simple(leaf("a")),
                Segment::List(vec![
                    ImportTree::from_path(vec![leaf("c")]),
                    ImportTree::from_path(vec![leaf("d"), leaf("e")]),
                ]),
            ],
        };
        let flat = tree.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].exp_segments, ["a", "c"]);
        assert_eq!(flat[1].exp_segments, ["a", "d", "e"]);
        assert_eq!(flat[1].imp_name, "e");
    }

    #[test]
    fn as_name_wins_over_leaf_name() {
        let mut renamed = leaf("c");
        renamed.as_name = Some("d".to_owned());
        let tree = ImportTree::from_path(vec![leaf("a"), renamed]);
        assert_eq!(tree.flatten()[0].imp_name, "d");
    }

    #[test]
    fn display_round_trips_the_shape() {
        let mut with_args = leaf("foo");
        with_args.args = Some(vec!["u32".to_owned()]);
        let tree = ImportTree::from_path(vec![leaf("a"), with_args]);
        assert_eq!(tree.to_string(), "a::foo(u32)");
    }
}
