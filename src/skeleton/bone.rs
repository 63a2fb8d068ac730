use crate::error::HierarchyError;
use crate::transform::CachedTransform;

/// A node of a rigid hierarchy. Links index into the owning pose's bone list.
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    pub local: CachedTransform,
    index: usize,
    parent: Option<usize>,
    first_child: Option<usize>,
    next_sibling: Option<usize>,
}

impl Bone {
    pub fn new(name: impl Into<String>, parent: Option<usize>, local: CachedTransform) -> Self {
        Self { name: name.into(), local, index: 0, parent, first_child: None, next_sibling: None }
    }

    /// Serialized poses store parents 1-based with `0` meaning "no parent".
    pub fn from_serialized_parent(name: impl Into<String>, parent: usize, local: CachedTransform) -> Self {
        Self::new(name, parent.checked_sub(1), local)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn first_child(&self) -> Option<usize> {
        self.first_child
    }

    pub fn next_sibling(&self) -> Option<usize> {
        self.next_sibling
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    fn clear_links(&mut self, index: usize) {
        self.index = index;
        self.first_child = None;
        self.next_sibling = None;
    }
}

/// Validates parent ordering, then rebuilds index, child and sibling links.
///
/// Each bone is prepended to its parent's child list, so siblings iterate in
/// reverse insertion order. Nothing is modified when validation fails.
pub fn setup_hierarchy(bones: &mut [Bone]) -> Result<(), HierarchyError> {
    validate(bones)?;
    for index in 0..bones.len() {
        bones[index].clear_links(index);
        if let Some(parent) = bones[index].parent {
            bones[index].next_sibling = bones[parent].first_child;
            bones[parent].first_child = Some(index);
        }
    }
    Ok(())
}

fn validate(bones: &[Bone]) -> Result<(), HierarchyError> {
    let root = bones.first().ok_or(HierarchyError::Empty)?;
    if let Some(parent) = root.parent {
        return Err(HierarchyError::RootHasParent { parent });
    }
    for (index, bone) in bones.iter().enumerate().skip(1) {
        match bone.parent {
            None => return Err(HierarchyError::MultipleRoots { index }),
            Some(parent) if parent >= index => {
                return Err(HierarchyError::ParentAfterChild { index, parent });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Walks a sibling chain starting at a parent's first child.
pub struct Children<'a> {
    bones: &'a [Bone],
    next: Option<usize>,
}

impl<'a> Children<'a> {
    pub(crate) fn new(bones: &'a [Bone], parent: usize) -> Self {
        let next = bones.get(parent).and_then(Bone::first_child);
        Self { bones, next }
    }
}

impl<'a> Iterator for Children<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = self.bones.get(current).and_then(Bone::next_sibling);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone(parent: Option<usize>) -> Bone {
        Bone::new("b", parent, CachedTransform::identity())
    }

    #[test]
    fn serialized_parent_is_one_based() {
        assert_eq!(Bone::from_serialized_parent("root", 0, CachedTransform::identity()).parent(), None);
        assert_eq!(Bone::from_serialized_parent("c", 3, CachedTransform::identity()).parent(), Some(2));
    }

    #[test]
    fn children_are_prepended() {
        let mut bones = vec![bone(None), bone(Some(0)), bone(Some(0)), bone(Some(1))];
        setup_hierarchy(&mut bones).unwrap();
        let children: Vec<usize> = Children::new(&bones, 0).collect();
        assert_eq!(children, vec![2, 1]);
        assert_eq!(Children::new(&bones, 1).collect::<Vec<_>>(), vec![3]);
        assert_eq!(Children::new(&bones, 3).count(), 0);
        for (i, b) in bones.iter().enumerate() {
            assert_eq!(b.index(), i);
        }
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut bones = vec![bone(None), bone(Some(0)), bone(Some(1))];
        setup_hierarchy(&mut bones).unwrap();
        let first = bones.clone();
        setup_hierarchy(&mut bones).unwrap();
        assert_eq!(first, bones);
    }

    #[test]
    fn rejects_malformed_lists() {
        assert_eq!(setup_hierarchy(&mut []), Err(HierarchyError::Empty));
        assert_eq!(
            setup_hierarchy(&mut [bone(Some(0))]),
            Err(HierarchyError::RootHasParent { parent: 0 })
        );
        assert_eq!(
            setup_hierarchy(&mut [bone(None), bone(None)]),
            Err(HierarchyError::MultipleRoots { index: 1 })
        );
        assert_eq!(
            setup_hierarchy(&mut [bone(None), bone(Some(2)), bone(Some(0))]),
            Err(HierarchyError::ParentAfterChild { index: 1, parent: 2 })
        );
    }
}
