//! The permission seam between the versioning core and an external
//! member/permission service.
//!
//! Lifecycle operations consult a [`PermissionPolicy`] and report denial as
//! `Ok(false)`, never as an error. The default method set implements the
//! standard policy: administrators pass unconditionally, everything else
//! falls back to edit permission.

use crate::record::{MemberId, RecordId};
use crate::schema::Stage;

/// The acting member, as supplied by the surrounding session context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub is_admin: bool,
}

impl Member {
    pub fn new(id: impl Into<MemberId>) -> Self {
        Member {
            id: id.into(),
            is_admin: false,
        }
    }

    pub fn admin(id: impl Into<MemberId>) -> Self {
        Member {
            id: id.into(),
            is_admin: true,
        }
    }
}

fn is_admin(actor: Option<&Member>) -> bool {
    actor.is_some_and(|member| member.is_admin)
}

/// Externally-supplied permission checks.
///
/// Implementors provide `can_edit`; the lifecycle checks default to
/// admin-or-edit and can be overridden individually.
pub trait PermissionPolicy {
    /// Base permission everything else falls back to.
    fn can_edit(&self, class: &str, id: RecordId, actor: Option<&Member>) -> bool;

    /// Live is world-readable; draft requires an authenticated actor.
    fn can_view_stage(&self, stage: Stage, actor: Option<&Member>) -> bool {
        match stage {
            Stage::Live => true,
            Stage::Draft => actor.is_some(),
        }
    }

    fn can_publish(&self, class: &str, id: RecordId, actor: Option<&Member>) -> bool {
        is_admin(actor) || self.can_edit(class, id, actor)
    }

    fn can_unpublish(&self, class: &str, id: RecordId, actor: Option<&Member>) -> bool {
        is_admin(actor) || self.can_edit(class, id, actor)
    }

    fn can_archive(&self, class: &str, id: RecordId, actor: Option<&Member>) -> bool {
        is_admin(actor) || (self.can_edit(class, id, actor) && self.can_unpublish(class, id, actor))
    }

    fn can_revert_to_live(&self, class: &str, id: RecordId, actor: Option<&Member>) -> bool {
        is_admin(actor) || self.can_edit(class, id, actor)
    }
}

/// Grants everything. The default policy of a fresh engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionPolicy for AllowAll {
    fn can_edit(&self, _class: &str, _id: RecordId, _actor: Option<&Member>) -> bool {
        true
    }
}

/// Denies everything except admin bypass. Used in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl PermissionPolicy for DenyAll {
    fn can_edit(&self, _class: &str, _id: RecordId, _actor: Option<&Member>) -> bool {
        false
    }
}
