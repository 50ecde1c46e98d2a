//! The digest tree: new activity grouped by container, page and author.
//!
//! Built fresh per subscriber per run and never stored. Siblings appear in
//! the order their first event arrived.

use crate::{
  event::{Author, CommentEvent, EditEvent},
  ordered::OrderedMap,
  subscription::{ContainerId, PageId, PageRef, UserId},
};

/// One digest per container; each becomes a separate message.
pub type DigestTree = OrderedMap<ContainerId, ContainerDigest>;

#[derive(Debug, Clone)]
pub struct ContainerDigest {
  pub container_id: ContainerId,
  pub name:         String,
  pub pages:        OrderedMap<PageId, PageDigest>,
}

#[derive(Debug, Clone)]
pub struct PageDigest {
  pub page_id: PageId,
  pub title:   String,
  pub users:   OrderedMap<UserId, UserActivity>,
}

/// Everything one author did on one page.
#[derive(Debug, Clone)]
pub struct UserActivity {
  pub user_id:       UserId,
  pub full_name:     String,
  pub edits:         Vec<EditEvent>,
  pub comments:      Vec<CommentEvent>,
  pub edit_count:    usize,
  pub comment_count: usize,
}

impl ContainerDigest {
  /// Walk to (creating as needed) the activity node for `author` on `page`.
  pub fn activity_for(&mut self, page: &PageRef, author: &Author) -> &mut UserActivity {
    let page_node = self.pages.get_or_insert_with(page.page_id, || PageDigest {
      page_id: page.page_id,
      title:   page.title.clone(),
      users:   OrderedMap::new(),
    });
    page_node.users.get_or_insert_with(author.user_id, || UserActivity {
      user_id:       author.user_id,
      full_name:     author.full_name.clone(),
      edits:         Vec::new(),
      comments:      Vec::new(),
      edit_count:    0,
      comment_count: 0,
    })
  }

  /// Total number of events recorded under this container.
  pub fn event_count(&self) -> usize {
    self
      .pages
      .values()
      .flat_map(|p| p.users.values())
      .map(|u| u.edit_count + u.comment_count)
      .sum()
  }
}

impl UserActivity {
  pub fn push_edit(&mut self, edit: EditEvent) {
    self.edit_count += 1;
    self.edits.push(edit);
  }

  pub fn push_comment(&mut self, comment: CommentEvent) {
    self.comment_count += 1;
    self.comments.push(comment);
  }
}
