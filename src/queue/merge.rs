//! `RequestMerger` — the collision table §4.5 specifies for C5's
//! merge-on-insert invariant.

use crate::config::Direction;

use super::request::{layer_patch, SyncRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    LocalUpdate,
    CloudUpdate,
    LocalDelete,
    CloudDelete,
    /// Full / OverwriteLocal / OverwriteCloud behave identically as the
    /// incumbent side of the table: once one of these is queued, it always
    /// wins over whatever arrives next.
    Recovery,
}

fn category(req: &SyncRequest) -> Category {
    match req {
        SyncRequest::LocalUpdate { .. } => Category::LocalUpdate,
        SyncRequest::CloudUpdate { .. } => Category::CloudUpdate,
        SyncRequest::LocalDelete { .. } => Category::LocalDelete,
        SyncRequest::CloudDelete { .. } => Category::CloudDelete,
        SyncRequest::Full { .. } | SyncRequest::OverwriteLocal { .. } | SyncRequest::OverwriteCloud { .. } => {
            Category::Recovery
        }
    }
}

/// The request the active `direction` picks for a directional ("full-or-directional")
/// collision, or for "simultaneous deletes".
fn recovery_for(direction: Direction, key: &crate::ids::ShadowKey) -> SyncRequest {
    match direction {
        Direction::Between => SyncRequest::Full { key: key.clone() },
        Direction::DeviceToCloud => SyncRequest::OverwriteCloud { key: key.clone() },
        Direction::CloudToDevice => SyncRequest::OverwriteLocal { key: key.clone() },
    }
}

/// Merge incoming request `new` into the already-queued `old` for the same
/// key, per §4.5's table. `direction` resolves "full-or-directional" cells.
pub fn merge(old: SyncRequest, new: SyncRequest, direction: Direction) -> SyncRequest {
    debug_assert_eq!(old.key(), new.key(), "merge requires matching keys");

    use Category::*;
    let key = old.key().clone();

    match (category(&old), category(&new)) {
        (LocalUpdate, LocalUpdate) => {
            let (SyncRequest::LocalUpdate { patch: ap, .. }, SyncRequest::LocalUpdate { patch: bp, .. }) =
                (&old, &new)
            else {
                unreachable!()
            };
            SyncRequest::LocalUpdate {
                key,
                patch: layer_patch(ap, bp),
            }
        }
        (CloudUpdate, CloudUpdate) => {
            let (
                SyncRequest::CloudUpdate { payload: ap, .. },
                SyncRequest::CloudUpdate {
                    payload: bp,
                    cloud_version,
                    ..
                },
            ) = (&old, &new)
            else {
                unreachable!()
            };
            SyncRequest::CloudUpdate {
                key,
                payload: layer_patch(ap, bp),
                cloud_version: *cloud_version,
            }
        }
        (LocalUpdate, CloudUpdate) | (CloudUpdate, LocalUpdate) => recovery_for(direction, &key),

        (LocalUpdate, LocalDelete)
        | (LocalUpdate, CloudDelete)
        | (CloudUpdate, LocalDelete)
        | (CloudUpdate, CloudDelete) => new,

        // A pending LocalUpdate is already reflected in the local store, so an
        // incoming Full subsumes it rather than being swallowed by it — "A kept
        // as full" (§4.5), distinct from the Overwrite-* columns of this row,
        // which keep the LocalUpdate outright.
        (LocalUpdate, Recovery) if matches!(new, SyncRequest::Full { .. }) => new,
        (LocalUpdate, Recovery) | (CloudUpdate, Recovery) => old,

        (LocalDelete, CloudDelete) | (CloudDelete, LocalDelete) => SyncRequest::Full { key },

        (LocalDelete, _) | (CloudDelete, _) => old,

        (Recovery, _) => old,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> crate::ids::ShadowKey {
        ("t1".to_string(), "".to_string())
    }

    #[test]
    fn two_local_updates_layer_their_patches() {
        let a = SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        };
        let b = SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 2, "b": 3}),
        };
        let merged = merge(a, b, Direction::Between);
        assert_eq!(
            merged,
            SyncRequest::LocalUpdate {
                key: key(),
                patch: json!({"a": 2, "b": 3}),
            }
        );
    }

    #[test]
    fn local_update_then_local_delete_keeps_the_delete() {
        let a = SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        };
        let b = SyncRequest::LocalDelete { key: key(), version: 4 };
        assert_eq!(merge(a, b.clone(), Direction::Between), b);
    }

    #[test]
    fn local_delete_beats_a_later_local_update() {
        let a = SyncRequest::LocalDelete { key: key(), version: 4 };
        let b = SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        };
        assert_eq!(merge(a.clone(), b, Direction::Between), a);
    }

    #[test]
    fn simultaneous_deletes_escalate_to_full() {
        let a = SyncRequest::LocalDelete { key: key(), version: 4 };
        let b = SyncRequest::CloudDelete { key: key(), cloud_version: 4 };
        assert_eq!(merge(a, b, Direction::Between), SyncRequest::Full { key: key() });
    }

    #[test]
    fn cloud_update_collision_is_directional_under_device_to_cloud() {
        let a = SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        };
        let b = SyncRequest::CloudUpdate {
            key: key(),
            payload: json!({"a": 2}),
            cloud_version: 7,
        };
        assert_eq!(
            merge(a, b, Direction::DeviceToCloud),
            SyncRequest::OverwriteCloud { key: key() }
        );
    }

    #[test]
    fn a_full_request_subsumes_a_pending_local_update() {
        let a = SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        };
        let b = SyncRequest::Full { key: key() };
        assert_eq!(merge(a, b.clone(), Direction::Between), b);
    }

    #[test]
    fn an_overwrite_request_does_not_subsume_a_pending_local_update() {
        let a = SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        };
        let b = SyncRequest::OverwriteCloud { key: key() };
        assert_eq!(merge(a.clone(), b, Direction::DeviceToCloud), a);
    }

    #[test]
    fn recovery_request_always_wins_once_queued() {
        let a = SyncRequest::Full { key: key() };
        let b = SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        };
        assert_eq!(merge(a.clone(), b, Direction::Between), a);
    }
}
