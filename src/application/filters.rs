//! Block selections used by bulk cache operations.

use std::collections::HashSet;

use crate::domain::{entities::BlockRecord, types::BlockId};

/// Top-level blocks of a template with a filename. The template's filename is
/// passed in because block rows only carry the template id.
pub fn is_renderable(block: &BlockRecord, template_has_filename: bool) -> bool {
    block.parent.is_none() && template_has_filename
}

/// Renderable blocks that are published.
pub fn is_cacheable(block: &BlockRecord, template_has_filename: bool) -> bool {
    is_renderable(block, template_has_filename) && !block.draft
}

/// Optional caller-supplied subset narrowing a bulk operation.
#[derive(Debug, Clone, Default)]
pub struct BlockSubset(Option<HashSet<BlockId>>);

impl BlockSubset {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn only(ids: impl IntoIterator<Item = BlockId>) -> Self {
        Self(Some(ids.into_iter().collect()))
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.0.as_ref().is_none_or(|ids| ids.contains(&id))
    }

    pub fn is_all(&self) -> bool {
        self.0.is_none()
    }
}

pub fn published(blocks: &[BlockRecord]) -> Vec<&BlockRecord> {
    blocks.iter().filter(|block| !block.draft).collect()
}

pub fn drafts(blocks: &[BlockRecord]) -> Vec<&BlockRecord> {
    blocks.iter().filter(|block| block.draft).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{blocks::fixtures, types::FieldId};

    #[test]
    fn nested_blocks_are_never_renderable() {
        let template = fixtures::template(1, "text");
        let nested = fixtures::block(1, &template, Some(FieldId(3)));
        assert!(!is_renderable(&nested, true));

        let top = fixtures::block(2, &template, None);
        assert!(is_renderable(&top, true));
        assert!(!is_renderable(&top, false));
    }

    #[test]
    fn drafts_are_not_cacheable() {
        let template = fixtures::template(1, "text");
        let mut block = fixtures::block(1, &template, None);
        block.draft = true;
        assert!(is_renderable(&block, true));
        assert!(!is_cacheable(&block, true));
    }

    #[test]
    fn subset_narrows_membership() {
        assert!(BlockSubset::all().contains(BlockId(9)));
        let subset = BlockSubset::only([BlockId(1)]);
        assert!(subset.contains(BlockId(1)));
        assert!(!subset.contains(BlockId(9)));
    }

    #[test]
    fn published_and_draft_scopes_partition() {
        let template = fixtures::template(1, "text");
        let mut draft = fixtures::block(1, &template, None);
        draft.draft = true;
        let live = fixtures::block(2, &template, None);
        let blocks = vec![draft, live];
        assert_eq!(published(&blocks)[0].id, BlockId(2));
        assert_eq!(drafts(&blocks)[0].id, BlockId(1));
    }
}
