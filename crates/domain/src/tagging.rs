use crate::tag::Tag;
use std::collections::BTreeSet;

/// タグ付けの判定ロジック
///
/// 現在のタグ集合と要求されたタグから、実際に必要な変更だけを求める。
/// 状態を持たない純粋関数の集まり。
pub struct TaggingDecider;

impl TaggingDecider {
    /// 追加が必要なタグ（既に付いているものと要求内の重複は除く）
    pub fn tags_to_add(current: &BTreeSet<Tag>, requested: &[Tag]) -> Vec<Tag> {
        select_unique(requested, |tag| !current.contains(tag))
    }

    /// 削除対象のタグ（要求内の重複を除く）
    pub fn tags_to_remove(current: &BTreeSet<Tag>, requested: &[Tag]) -> Vec<Tag> {
        select_unique(requested, |tag| current.contains(tag))
    }
}

fn select_unique(requested: &[Tag], keep: impl Fn(&Tag) -> bool) -> Vec<Tag> {
    let mut seen = BTreeSet::new();
    requested
        .iter()
        .filter(|tag| keep(tag) && seen.insert(*tag))
        .cloned()
        .collect()
}
