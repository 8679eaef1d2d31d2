//! Access control resolution.
//!
//! Rights on an object are decided per right by the single highest-priority
//! applicable entry:
//!
//! 1. The effective ACL (defaults, extended entries, own `_acl`, merged by
//!    name) is evaluated; an empty list grants everything at the lowest
//!    priority.
//! 2. Objects associated with `secures` contribute their securing entries
//!    whose `match` accepts the target's type.
//! 3. Entries whose rule rejects the request are excluded.
//! 4. A right is granted iff its deciding entry is `allow`.
//!
//! Priority orders by the entry's `explicit` flag, then by source (open
//! default < direct < securing), then by position within the source. Position
//! is unique within a source, so two entries never tie.

use crate::container::SyncableObject;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeSet;
use syncable_types::{ACCESS_RIGHTS, AccessControlEntry, AccessControlEntryType, AccessRight};
use tracing::debug;

/// Options for rights evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessRightsOptions {
    /// Only count rights whose allowing entry is `grantable`.
    pub grantable_only: bool,
}

impl AccessRightsOptions {
    pub fn grantable_only() -> Self {
        Self {
            grantable_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntrySource {
    OpenDefault,
    Direct,
    Securing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EntryPriority {
    explicit: bool,
    source: EntrySource,
    position: usize,
}

#[derive(Debug, Clone, Copy)]
struct ComparableItem {
    entry_type: AccessControlEntryType,
    grantable: bool,
    priority: EntryPriority,
}

/// Applicable entries per right, sorted by descending priority.
#[derive(Debug, Default)]
struct ComparableItems {
    read: Vec<ComparableItem>,
    write: Vec<ComparableItem>,
    full: Vec<ComparableItem>,
}

impl ComparableItems {
    fn get(&self, right: AccessRight) -> &[ComparableItem] {
        match right {
            AccessRight::Read => &self.read,
            AccessRight::Write => &self.write,
            AccessRight::Full => &self.full,
        }
    }

    fn get_mut(&mut self, right: AccessRight) -> &mut Vec<ComparableItem> {
        match right {
            AccessRight::Read => &mut self.read,
            AccessRight::Write => &mut self.write,
            AccessRight::Full => &mut self.full,
        }
    }

    fn push(&mut self, rights: &[AccessRight], item: ComparableItem) {
        for right in rights {
            self.get_mut(*right).push(item);
        }
    }

    fn sort(&mut self) {
        for right in ACCESS_RIGHTS {
            self.get_mut(right)
                .sort_by(|a, b| b.priority.cmp(&a.priority));
        }
    }
}

impl<'a> SyncableObject<'a> {
    /// Computes the rights `context` holds on this object.
    pub fn access_rights(
        &self,
        context: &Context,
        options: AccessRightsOptions,
    ) -> CoreResult<Vec<AccessRight>> {
        let items = self.comparable_items(context)?;

        let granted = ACCESS_RIGHTS
            .into_iter()
            .filter(|right| {
                for item in items.get(*right) {
                    if item.entry_type != AccessControlEntryType::Allow {
                        break;
                    }

                    if !options.grantable_only || item.grantable {
                        return true;
                    }
                }

                false
            })
            .collect();

        Ok(granted)
    }

    /// Returns true if every right in `rights` is granted.
    pub fn test_access_rights(
        &self,
        rights: &[AccessRight],
        context: &Context,
        options: AccessRightsOptions,
    ) -> CoreResult<bool> {
        let granted = self.access_rights(context, options)?;
        Ok(rights.iter().all(|right| granted.contains(right)))
    }

    /// Fails with `AccessDenied` unless every right in `rights` is granted.
    pub fn validate_access_rights(
        &self,
        rights: &[AccessRight],
        context: &Context,
        options: AccessRightsOptions,
    ) -> CoreResult<()> {
        let granted = self.access_rights(context, options)?;

        let missing: Vec<AccessRight> = rights
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|right| !granted.contains(right))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        debug!("Access denied on {}: missing {:?}", self.key(), missing);

        Err(CoreError::AccessDenied {
            granted,
            required: rights.to_vec(),
            missing,
        })
    }

    fn comparable_items(&self, context: &Context) -> CoreResult<ComparableItems> {
        let mut items = ComparableItems::default();

        let acl = self.acl()?;

        if acl.is_empty() {
            let item = ComparableItem {
                entry_type: AccessControlEntryType::Allow,
                grantable: true,
                priority: EntryPriority {
                    explicit: false,
                    source: EntrySource::OpenDefault,
                    position: 0,
                },
            };
            items.push(&ACCESS_RIGHTS, item);
        } else {
            for (position, entry) in acl.iter().enumerate() {
                if !self.test_entry(self, entry, context)? {
                    continue;
                }

                items.push(
                    &entry.rights,
                    comparable_item(entry, EntrySource::Direct, position),
                );
            }
        }

        let target_type = self.syncable_type();
        let mut position = 0;

        for associated in self.associated_objects(true)? {
            for securing in associated.securing_acl()? {
                if !securing.applies_to(target_type) {
                    continue;
                }

                let entry = &securing.entry;
                let current = position;
                position += 1;

                if !associated.test_entry(self, entry, context)? {
                    continue;
                }

                items.push(
                    &entry.rights,
                    comparable_item(entry, EntrySource::Securing, current),
                );
            }
        }

        items.sort();

        Ok(items)
    }

    /// Evaluates `entry`, owned by this object, for `target`.
    fn test_entry(
        &self,
        target: &SyncableObject<'_>,
        entry: &AccessControlEntry,
        context: &Context,
    ) -> CoreResult<bool> {
        let rule = self
            .schema()
            .rule(&entry.rule)
            .ok_or_else(|| CoreError::UnknownRule {
                syncable_type: self.syncable_type().to_string(),
                rule: entry.rule.clone(),
            })?;

        Ok(rule(self, target, context, &entry.options))
    }
}

fn comparable_item(
    entry: &AccessControlEntry,
    source: EntrySource,
    position: usize,
) -> ComparableItem {
    ComparableItem {
        entry_type: entry.entry_type,
        grantable: entry.grantable,
        priority: EntryPriority {
            explicit: entry.explicit,
            source,
            position,
        },
    }
}
