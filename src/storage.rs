use std::path::Path;

use chrono::{DateTime, Utc};
use sled::transaction::{abort, ConflictableTransactionResult};
use sled::{Db, Transactional};
use tracing::debug;

use crate::models::{Goal, NewUser, Schedule, Task, User, Vision};
use crate::scope::{decode_u64, from_transaction, ScopedTree};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
    #[error("record encoding: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("corrupt key in index tree")]
    CorruptKey,
    #[error("email already registered")]
    DuplicateEmail,
    #[error("parent record does not exist")]
    MissingParent,
}

/// Handle to the embedded store. Cheap to clone; every clone shares the same
/// Sled database, so one `Storage` opened at startup is passed to every
/// component that reads or writes data.
#[derive(Clone)]
pub struct Storage {
    db: Db,
    // Credential store: id -> User, plus the email uniqueness index
    users: sled::Tree,
    emails: sled::Tree,
    pub visions: ScopedTree<Vision>,
    pub goals: ScopedTree<Goal>,
    pub tasks: ScopedTree<Task>,
}

impl Storage {
    /// Open or create the Sled database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            users: db.open_tree("users")?,
            emails: db.open_tree("users_by_email")?,
            visions: ScopedTree::open(&db, "visions")?,
            goals: ScopedTree::open(&db, "goals")?,
            tasks: ScopedTree::open(&db, "tasks")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn next_id(&self) -> Result<u64, StoreError> {
        // sled ids start at 0; keep 0 free so it never names a record
        Ok(self.db.generate_id()? + 1)
    }

    // --- Credential store ---

    pub fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.emails.contains_key(email.as_bytes())?)
    }

    pub fn user_exists(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.users.contains_key(id.to_be_bytes())?)
    }

    pub fn get_user(&self, id: u64) -> Result<Option<User>, StoreError> {
        match self.users.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        match self.emails.get(email.as_bytes())? {
            Some(id) => self.get_user(decode_u64(&id)?),
            None => Ok(None),
        }
    }

    /// Creates the account. The email index entry and the user record are
    /// written in one transaction that aborts with `DuplicateEmail` if the
    /// email is already taken.
    pub fn create_user(&self, new: NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let id = self.next_id()?;
        let user = User {
            id,
            name: new.name,
            nickname: new.nickname,
            email: new.email,
            password_hash: new.password_hash,
            created_at: now,
            updated_at: now,
        };
        let bytes = serde_json::to_vec(&user)?;
        let key = id.to_be_bytes();
        let email = user.email.as_bytes();
        (&self.emails, &self.users)
            .transaction(|(emails, users)| -> ConflictableTransactionResult<(), StoreError> {
                if emails.get(email)?.is_some() {
                    return abort(StoreError::DuplicateEmail);
                }
                emails.insert(email, &key[..])?;
                users.insert(&key[..], bytes.as_slice())?;
                Ok(())
            })
            .map_err(from_transaction)?;
        debug!(user_id = id, "user created");
        Ok(user)
    }

    /// Removes the account and everything it owns. No HTTP route reaches
    /// this; tokens already issued for the user stop verifying.
    pub fn delete_user(&self, id: u64) -> Result<bool, StoreError> {
        let Some(user) = self.get_user(id)? else {
            return Ok(false);
        };
        let key = id.to_be_bytes();
        let email = user.email.as_bytes();
        let removed = (&self.emails, &self.users)
            .transaction(|(emails, users)| -> ConflictableTransactionResult<bool, StoreError> {
                if users.remove(&key[..])?.is_none() {
                    return Ok(false);
                }
                emails.remove(email)?;
                Ok(true)
            })
            .map_err(from_transaction)?;
        if !removed {
            return Ok(false);
        }
        for vision_id in self.visions.ids_under(id)? {
            self.delete_vision(vision_id, id)?;
        }
        debug!(user_id = id, "user deleted");
        Ok(true)
    }

    // --- Visions (scoped to a user) ---

    pub fn insert_vision(
        &self,
        user_id: u64,
        fields: Schedule,
        now: DateTime<Utc>,
    ) -> Result<Vision, StoreError> {
        let vision = Vision {
            id: self.next_id()?,
            user_id,
            name: fields.name,
            start_date: fields.start_date,
            due_date: fields.due_date,
            finished: fields.finished,
            created_at: now,
            updated_at: now,
        };
        self.visions.insert_under(&self.users, &vision)?;
        Ok(vision)
    }

    /// Overwrites the mutable fields of a vision owned by `user_id`.
    /// Returns `None` when the id is unknown or owned by someone else.
    pub fn update_vision(
        &self,
        id: u64,
        user_id: u64,
        fields: Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<Vision>, StoreError> {
        self.visions.update(id, user_id, |vision| {
            vision.name = fields.name.clone();
            vision.start_date = fields.start_date;
            vision.due_date = fields.due_date;
            vision.finished = fields.finished;
            vision.updated_at = now;
        })
    }

    /// Deletes the vision, then every goal and task beneath it. The vision
    /// goes first so no goal can be inserted under it mid-cascade.
    pub fn delete_vision(&self, id: u64, user_id: u64) -> Result<bool, StoreError> {
        if !self.visions.remove(id, user_id)? {
            return Ok(false);
        }
        for goal_id in self.goals.ids_under(id)? {
            self.delete_goal(goal_id, id)?;
        }
        Ok(true)
    }

    // --- Goals (scoped to a vision) ---

    pub fn insert_goal(
        &self,
        vision_id: u64,
        prompt: String,
        fields: Schedule,
        now: DateTime<Utc>,
    ) -> Result<Goal, StoreError> {
        let goal = Goal {
            id: self.next_id()?,
            vision_id,
            name: fields.name,
            prompt,
            start_date: fields.start_date,
            due_date: fields.due_date,
            finished: fields.finished,
            created_at: now,
            updated_at: now,
        };
        self.goals.insert_under(self.visions.index(), &goal)?;
        Ok(goal)
    }

    /// Like [`Storage::update_vision`]; `prompt` is only replaced when given.
    pub fn update_goal(
        &self,
        id: u64,
        vision_id: u64,
        fields: Schedule,
        prompt: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<Goal>, StoreError> {
        self.goals.update(id, vision_id, |goal| {
            goal.name = fields.name.clone();
            if let Some(prompt) = &prompt {
                goal.prompt = prompt.clone();
            }
            goal.start_date = fields.start_date;
            goal.due_date = fields.due_date;
            goal.finished = fields.finished;
            goal.updated_at = now;
        })
    }

    pub fn delete_goal(&self, id: u64, vision_id: u64) -> Result<bool, StoreError> {
        if !self.goals.remove(id, vision_id)? {
            return Ok(false);
        }
        for task_id in self.tasks.ids_under(id)? {
            self.tasks.remove(task_id, id)?;
        }
        Ok(true)
    }

    // --- Tasks (scoped to a goal) ---

    pub fn insert_task(
        &self,
        goal_id: u64,
        fields: Schedule,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let task = Task {
            id: self.next_id()?,
            goal_id,
            name: fields.name,
            start_date: fields.start_date,
            due_date: fields.due_date,
            finished: fields.finished,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert_under(self.goals.index(), &task)?;
        Ok(task)
    }

    pub fn update_task(
        &self,
        id: u64,
        goal_id: u64,
        fields: Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, StoreError> {
        self.tasks.update(id, goal_id, |task| {
            task.name = fields.name.clone();
            task.start_date = fields.start_date;
            task.due_date = fields.due_date;
            task.finished = fields.finished;
            task.updated_at = now;
        })
    }

    pub fn delete_task(&self, id: u64, goal_id: u64) -> Result<bool, StoreError> {
        self.tasks.remove(id, goal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ListFilter;
    use tempfile::TempDir;

    fn open() -> (TempDir, Storage) {
        let dir = TempDir::new().expect("temp dir");
        let storage = Storage::open(dir.path()).expect("Failed to open storage");
        (dir, storage)
    }

    fn named(name: &str) -> Schedule {
        Schedule {
            name: name.to_string(),
            ..Schedule::default()
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Ann".into(),
            nickname: "ann".into(),
            email: email.into(),
            password_hash: "hash".into(),
        }
    }

    #[test]
    fn duplicate_email_is_rejected_once_persisted() {
        let (_dir, storage) = open();
        let now = Utc::now();
        let ann = storage.create_user(new_user("a@x.com"), now).unwrap();
        assert!(ann.id > 0);
        assert!(storage.email_exists("a@x.com").unwrap());

        let again = storage.create_user(new_user("a@x.com"), now);
        assert!(matches!(again, Err(StoreError::DuplicateEmail)));

        let found = storage.find_user_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(found.id, ann.id);
        assert!(storage.find_user_by_email("b@x.com").unwrap().is_none());
    }

    #[test]
    fn children_require_an_existing_parent() {
        let (_dir, storage) = open();
        let now = Utc::now();
        assert!(matches!(
            storage.insert_vision(99, named("Launch"), now),
            Err(StoreError::MissingParent)
        ));
        assert!(matches!(
            storage.insert_goal(99, "p".into(), named("Plan"), now),
            Err(StoreError::MissingParent)
        ));
        assert!(matches!(
            storage.insert_task(99, named("Step"), now),
            Err(StoreError::MissingParent)
        ));
    }

    #[test]
    fn update_is_scoped_to_parent() {
        let (_dir, storage) = open();
        let now = Utc::now();
        let user = storage.create_user(new_user("a@x.com"), now).unwrap();
        let vision = storage.insert_vision(user.id, named("Launch"), now).unwrap();
        let goal = storage.insert_goal(vision.id, "seed".into(), named("Plan"), now).unwrap();

        let foreign = storage
            .update_goal(goal.id, vision.id + 1000, named("Hijack"), None, now)
            .unwrap();
        assert!(foreign.is_none());

        let mut fields = named("Plan v2");
        fields.finished = true;
        let updated = storage
            .update_goal(goal.id, vision.id, fields, None, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Plan v2");
        assert_eq!(updated.prompt, "seed");
        assert!(updated.finished);
        assert_eq!(updated.created_at, goal.created_at);
    }

    #[test]
    fn deleting_a_vision_cascades_to_goals_and_tasks() {
        let (_dir, storage) = open();
        let now = Utc::now();
        let user = storage.create_user(new_user("a@x.com"), now).unwrap();
        let vision = storage.insert_vision(user.id, named("Launch"), now).unwrap();
        let other = storage.insert_vision(user.id, named("Health"), now).unwrap();
        let goal = storage.insert_goal(vision.id, "p".into(), named("Plan"), now).unwrap();
        let kept = storage.insert_goal(other.id, "p".into(), named("Plan"), now).unwrap();
        let t1 = storage.insert_task(goal.id, named("One"), now).unwrap();
        let t2 = storage.insert_task(goal.id, named("Two"), now).unwrap();

        assert!(!storage.delete_vision(vision.id, user.id + 1).unwrap());
        assert!(storage.delete_vision(vision.id, user.id).unwrap());

        assert!(!storage.goals.exists_by_id(goal.id, vision.id).unwrap());
        assert!(!storage.tasks.exists_by_id(t1.id, goal.id).unwrap());
        assert!(!storage.tasks.exists_by_id(t2.id, goal.id).unwrap());
        assert!(storage.goals.owner_of(goal.id).unwrap().is_none());
        assert!(storage.goals.exists_by_id(kept.id, other.id).unwrap());
        assert_eq!(storage.visions.list(user.id, &ListFilter::All).unwrap().len(), 1);
    }

    #[test]
    fn deleting_a_user_removes_credentials_and_visions() {
        let (_dir, storage) = open();
        let now = Utc::now();
        let user = storage.create_user(new_user("a@x.com"), now).unwrap();
        let vision = storage.insert_vision(user.id, named("Launch"), now).unwrap();

        assert!(storage.delete_user(user.id).unwrap());
        assert!(!storage.user_exists(user.id).unwrap());
        assert!(!storage.email_exists("a@x.com").unwrap());
        assert!(!storage.visions.exists_by_id(vision.id, user.id).unwrap());
        assert!(!storage.delete_user(user.id).unwrap());
    }

    #[test]
    fn racing_registrations_leave_one_account() {
        let (_dir, storage) = open();
        let now = Utc::now();
        let shared = &storage;
        let outcomes: Vec<Result<User, StoreError>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || shared.create_user(new_user("same@x.com"), now)))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let created: Vec<&User> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(created.len(), 1);
        assert!(outcomes
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(StoreError::DuplicateEmail))));
        assert_eq!(storage.users.len(), 1);
        assert_eq!(storage.emails.len(), 1);
        let found = storage.find_user_by_email("same@x.com").unwrap().unwrap();
        assert_eq!(found.id, created[0].id);
    }

    #[test]
    fn rejected_registration_writes_no_user() {
        let (_dir, storage) = open();
        let now = Utc::now();
        storage.create_user(new_user("a@x.com"), now).unwrap();
        assert!(storage.create_user(new_user("a@x.com"), now).is_err());
        assert_eq!(storage.users.len(), 1);

        let other = storage.create_user(new_user("b@x.com"), now).unwrap();
        assert_eq!(storage.find_user_by_email("b@x.com").unwrap().unwrap().id, other.id);
    }

    #[test]
    fn delete_racing_writers_leaves_no_orphans_or_revivals() {
        let (_dir, storage) = open();
        let now = Utc::now();
        let user = storage.create_user(new_user("a@x.com"), now).unwrap();

        for round in 0..60 {
            let vision = storage.insert_vision(user.id, named("Launch"), now).unwrap();
            let goal = storage.insert_goal(vision.id, "p".into(), named("Seed"), now).unwrap();

            let deleted = std::thread::scope(|scope| {
                scope.spawn(|| {
                    for i in 0..20 {
                        let name = named(&format!("G{i}"));
                        match storage.insert_goal(vision.id, "p".into(), name, now) {
                            Ok(_) | Err(StoreError::MissingParent) => {}
                            Err(err) => panic!("insert_goal: {err}"),
                        }
                    }
                });
                scope.spawn(|| {
                    for i in 0..20 {
                        match storage.insert_task(goal.id, named(&format!("T{i}")), now) {
                            Ok(_) | Err(StoreError::MissingParent) => {}
                            Err(err) => panic!("insert_task: {err}"),
                        }
                    }
                });
                scope.spawn(|| {
                    for i in 0..20 {
                        storage
                            .update_vision(vision.id, user.id, named(&format!("V{i}")), now)
                            .unwrap();
                    }
                });
                scope.spawn(|| storage.delete_vision(vision.id, user.id)).join().unwrap()
            });

            assert!(deleted.unwrap(), "round {round}");
            assert!(storage.visions.get(vision.id, user.id).unwrap().is_none(), "round {round}");
            assert_eq!(storage.visions.owner_of(vision.id).unwrap(), None, "round {round}");
            assert!(storage.goals.ids_under(vision.id).unwrap().is_empty(), "round {round}");
            assert!(storage.tasks.ids_under(goal.id).unwrap().is_empty(), "round {round}");
        }
        assert!(storage.visions.list(user.id, &ListFilter::All).unwrap().is_empty());
    }
}
