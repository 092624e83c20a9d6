//! In-process backend used by `--dsn memory://` and the test suites.
//!
//! All tables sit behind one tokio mutex. A transaction takes the owned guard
//! for its whole lifetime and works on a staged copy; `commit` swaps the copy
//! in, dropping the transaction discards it.

use super::{
    IsolationLevel, NewHistory, NewProfile, SessionRecord, Store, StoreError, StoreFuture, StoreTx,
    User, UserHistory, UserProfile,
};
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Failure points that tests can switch on to exercise rollback paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Every operation fails as if the database were down.
    Unavailable,
    InsertProfile,
    UpdateProfile,
    AppendHistory,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    insert_profile: AtomicBool,
    update_profile: AtomicBool,
    append_history: AtomicBool,
}

impl Faults {
    fn flag(&self, fault: Fault) -> &AtomicBool {
        match fault {
            Fault::Unavailable => &self.unavailable,
            Fault::InsertProfile => &self.insert_profile,
            Fault::UpdateProfile => &self.update_profile,
            Fault::AppendHistory => &self.append_history,
        }
    }

    fn check(&self, fault: Fault) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Aborted("store unavailable".to_string()));
        }
        if self.flag(fault).load(Ordering::SeqCst) {
            return Err(StoreError::Aborted(format!("injected fault: {fault:?}")));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    profiles: BTreeMap<i64, UserProfile>,
    histories: Vec<UserHistory>,
    sessions: HashMap<Vec<u8>, SessionRecord>,
    next_user_id: i64,
    next_history_id: i64,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.flag(fault).store(true, Ordering::SeqCst);
    }

    pub fn clear(&self, fault: Fault) {
        self.faults.flag(fault).store(false, Ordering::SeqCst);
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    pub async fn profile_count(&self) -> usize {
        self.tables.lock().await.profiles.len()
    }

    pub async fn history_count(&self) -> usize {
        self.tables.lock().await.histories.len()
    }

    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }

    /// Move a stored session's expiry, used to simulate the passage of time.
    pub async fn set_session_expiry(&self, session_hash: &[u8], expires_at: DateTime<Utc>) -> bool {
        match self.tables.lock().await.sessions.get_mut(session_hash) {
            Some(record) => {
                record.expires_at = expires_at;
                true
            }
            None => false,
        }
    }
}

impl Store for MemoryStore {
    fn find_user_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            let tables = self.tables.lock().await;
            Ok(tables.users.values().find(|user| user.email == email).cloned())
        })
    }

    fn find_user_by_id(&self, user_id: i64) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            Ok(self.tables.lock().await.users.get(&user_id).cloned())
        })
    }

    fn find_profile(&self, user_id: i64) -> StoreFuture<'_, Option<UserProfile>> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            Ok(self.tables.lock().await.profiles.get(&user_id).cloned())
        })
    }

    fn list_history(&self, user_id: i64) -> StoreFuture<'_, Vec<UserHistory>> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            let tables = self.tables.lock().await;
            let mut entries: Vec<UserHistory> = tables
                .histories
                .iter()
                .filter(|entry| entry.user_id == user_id)
                .cloned()
                .collect();
            entries.sort_by(|a, b| {
                b.changed_at
                    .cmp(&a.changed_at)
                    .then(b.user_history_id.cmp(&a.user_history_id))
            });
            Ok(entries)
        })
    }

    fn insert_session<'a>(
        &'a self,
        user_id: i64,
        session_hash: &'a [u8],
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            let mut tables = self.tables.lock().await;
            if !tables.users.contains_key(&user_id) {
                return Err(StoreError::Aborted(format!("user {user_id} does not exist")));
            }
            if tables.sessions.contains_key(session_hash) {
                return Err(StoreError::Conflict("user_sessions.session_hash".to_string()));
            }
            tables.sessions.insert(
                session_hash.to_vec(),
                SessionRecord {
                    user_id,
                    expires_at,
                },
            );
            Ok(())
        })
    }

    fn find_session<'a>(&'a self, session_hash: &'a [u8]) -> StoreFuture<'a, Option<SessionRecord>> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            Ok(self.tables.lock().await.sessions.get(session_hash).cloned())
        })
    }

    fn delete_session<'a>(&'a self, session_hash: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            self.tables.lock().await.sessions.remove(session_hash);
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.faults.check(Fault::Unavailable) })
    }

    fn begin(&self, isolation: IsolationLevel) -> StoreFuture<'_, Box<dyn StoreTx>> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            let guard = Arc::clone(&self.tables).lock_owned().await;
            let staged = guard.clone();
            // Transactions are fully serialized, which satisfies every isolation level.
            debug!(%isolation, "memory transaction started");
            Ok(Box::new(MemoryTx {
                guard,
                staged,
                faults: Arc::clone(&self.faults),
            }) as Box<dyn StoreTx>)
        })
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
    faults: Arc<Faults>,
}

impl StoreTx for MemoryTx {
    fn insert_user<'a>(
        &'a mut self,
        email: &'a str,
        password_hash: &'a str,
    ) -> StoreFuture<'a, User> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            if self.staged.users.values().any(|user| user.email == email) {
                return Err(StoreError::Conflict("users.email".to_string()));
            }
            self.staged.next_user_id += 1;
            let now = Utc::now();
            let user = User {
                user_id: self.staged.next_user_id,
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                created_at: now,
                updated_at: now,
            };
            self.staged.users.insert(user.user_id, user.clone());
            Ok(user)
        })
    }

    fn insert_profile<'a>(&'a mut self, profile: &'a NewProfile) -> StoreFuture<'a, UserProfile> {
        Box::pin(async move {
            self.faults.check(Fault::InsertProfile)?;
            if !self.staged.users.contains_key(&profile.user_id) {
                return Err(StoreError::Aborted(format!(
                    "user {} does not exist",
                    profile.user_id
                )));
            }
            if self.staged.profiles.contains_key(&profile.user_id) {
                return Err(StoreError::Conflict("user_infos.user_id".to_string()));
            }
            let now = Utc::now();
            let row = UserProfile {
                user_id: profile.user_id,
                name: profile.name.clone(),
                age: profile.age,
                gender: profile.gender,
                profile_image: profile.profile_image.clone(),
                created_at: now,
                updated_at: now,
            };
            self.staged.profiles.insert(row.user_id, row.clone());
            Ok(row)
        })
    }

    fn lock_profile(&mut self, user_id: i64) -> StoreFuture<'_, Option<UserProfile>> {
        Box::pin(async move {
            self.faults.check(Fault::Unavailable)?;
            Ok(self.staged.profiles.get(&user_id).cloned())
        })
    }

    fn update_profile<'a>(&'a mut self, profile: &'a UserProfile) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.faults.check(Fault::UpdateProfile)?;
            match self.staged.profiles.get_mut(&profile.user_id) {
                Some(row) => {
                    row.name.clone_from(&profile.name);
                    row.age = profile.age;
                    row.gender = profile.gender;
                    row.profile_image.clone_from(&profile.profile_image);
                    row.updated_at = profile.updated_at;
                    Ok(())
                }
                None => Err(StoreError::Aborted(format!(
                    "profile for user {} disappeared during update",
                    profile.user_id
                ))),
            }
        })
    }

    fn append_history<'a>(&'a mut self, entry: &'a NewHistory) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.faults.check(Fault::AppendHistory)?;
            if !self.staged.users.contains_key(&entry.user_id) {
                return Err(StoreError::Aborted(format!(
                    "user {} does not exist",
                    entry.user_id
                )));
            }
            self.staged.next_history_id += 1;
            self.staged.histories.push(UserHistory {
                user_history_id: self.staged.next_history_id,
                user_id: entry.user_id,
                changed_field: entry.changed_field.clone(),
                old_value: entry.old_value.clone(),
                new_value: entry.new_value.clone(),
                changed_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let MemoryTx {
                mut guard,
                staged,
                faults,
            } = *self;
            faults.check(Fault::Unavailable)?;
            *guard = staged;
            Ok(())
        })
    }
}
