//! SQLite user store: accounts, bearer sessions and the login audit trail.

pub mod password;
mod schema;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Local, NaiveDateTime, TimeDelta};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::RunQueryDsl;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rand::rngs::SysRng;
use rand::TryRng;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AvaBotError, Result};
use schema::{login_attempts, user_sessions, users};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
const MIN_PASSWORD_LEN: usize = 6;
const TOKEN_BYTES: usize = 32;
/// Timestamps are stored as naive local ISO-8601 text, which sorts and
/// compares correctly as a string.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub const MSG_REQUIRED: &str = "Usuario y contraseña son obligatorios";
pub const MSG_MISMATCH: &str = "Las contraseñas no coinciden";
pub const MSG_TOO_SHORT: &str = "La contraseña debe tener al menos 6 caracteres";
pub const MSG_DUPLICATE: &str = "El usuario o email ya existe";

/// Failed logins for one identifier inside the window that lock it out.
pub const MAX_FAILED_LOGINS: i64 = 5;
pub const LOCKOUT_WINDOW_SECS: i64 = 15 * 60;

type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: String,
    pub last_login: Option<String>,
    pub role: String,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub confirm_password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Queryable)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    first_name: Option<String>,
    last_name: Option<String>,
    is_admin: bool,
    is_active: bool,
    created_at: String,
    last_login: Option<String>,
    role: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            is_admin: row.is_admin,
            is_active: row.is_active,
            created_at: row.created_at,
            last_login: row.last_login,
            role: row.role,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUserRow<'a> {
    id: &'a str,
    username: &'a str,
    email: &'a str,
    password_hash: &'a str,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    is_admin: bool,
    is_active: bool,
    created_at: &'a str,
    role: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = user_sessions)]
struct NewSessionRow<'a> {
    id: &'a str,
    user_id: &'a str,
    session_token: &'a str,
    ip_address: Option<&'a str>,
    user_agent: Option<&'a str>,
    created_at: &'a str,
    expires_at: &'a str,
    is_active: bool,
}

#[derive(Insertable)]
#[diesel(table_name = login_attempts)]
struct NewLoginAttemptRow<'a> {
    id: &'a str,
    username: &'a str,
    ip_address: Option<&'a str>,
    success: bool,
    attempted_at: &'a str,
    user_agent: Option<&'a str>,
}

pub struct UserStore {
    pool: SqlitePool,
    hash_rounds: u32,
    session_days: i64,
}

impl UserStore {
    pub async fn new(sqlite_path: impl AsRef<str>, hash_rounds: u32, session_days: i64) -> Result<Self> {
        let sqlite_path = sqlite_path.as_ref();
        crate::db::ensure_parent_dir(sqlite_path)?;
        run_migrations(sqlite_path).await?;
        repair_legacy_columns(sqlite_path).await?;

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        info!(path = sqlite_path, "user store ready");
        Ok(Self {
            pool,
            hash_rounds,
            session_days,
        })
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.users_db_path(),
            config.hash_rounds(),
            config.session_days(),
        )
        .await
    }

    /// Validates in order: required fields, confirmation, length, uniqueness.
    pub async fn create_user(&self, new: &NewUser) -> Result<User> {
        let username = new.username.trim();
        if username.is_empty() || new.password.is_empty() {
            return Err(AvaBotError::Validation(MSG_REQUIRED.to_string()));
        }
        if let Some(confirm) = &new.confirm_password {
            if confirm != &new.password {
                return Err(AvaBotError::Validation(MSG_MISMATCH.to_string()));
            }
        }
        if new.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AvaBotError::Validation(MSG_TOO_SHORT.to_string()));
        }
        let email = new
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{username}@ava.local"));

        let mut conn = self.conn().await?;
        let existing: i64 = users::table
            .filter(users::username.eq(username).or(users::email.eq(&email)))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        if existing > 0 {
            return Err(AvaBotError::Validation(MSG_DUPLICATE.to_string()));
        }

        let password = new.password.clone();
        let rounds = self.hash_rounds;
        let password_hash =
            tokio::task::spawn_blocking(move || password::hash_password(&password, rounds))
                .await
                .map_err(|e| AvaBotError::Runtime(e.to_string()))??;

        let id = uuid::Uuid::new_v4().to_string();
        let role = if new.is_admin { "admin" } else { "user" };
        let created_at = timestamp(now());
        let row = NewUserRow {
            id: &id,
            username,
            email: &email,
            password_hash: &password_hash,
            first_name: new.first_name.as_deref().map(str::trim),
            last_name: new.last_name.as_deref().map(str::trim),
            is_admin: new.is_admin,
            is_active: true,
            created_at: &created_at,
            role,
        };
        diesel::insert_into(users::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint failed") {
                    AvaBotError::Validation(MSG_DUPLICATE.to_string())
                } else {
                    AvaBotError::Database(e.to_string())
                }
            })?;
        info!(user_id = %id, username, "user registered");
        self.require_user(&id).await
    }

    /// Matches by username or email; inactive users never authenticate.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> Result<Option<User>> {
        let identifier = identifier.trim();
        if identifier.is_empty() || password.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn().await?;
        let row: Option<UserRow> = users::table
            .filter(users::username.eq(identifier).or(users::email.eq(identifier)))
            .filter(users::is_active.eq(true))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let candidate = password.to_string();
        let stored = row.password_hash.clone();
        let verified =
            tokio::task::spawn_blocking(move || password::verify_password(&candidate, &stored))
                .await
                .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
        if !verified {
            return Ok(None);
        }

        let now = timestamp(now());
        diesel::update(users::table.filter(users::id.eq(&row.id)))
            .set(users::last_login.eq(Some(now.clone())))
            .execute(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        let mut user = User::from(row);
        user.last_login = Some(now);
        Ok(Some(user))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        self.find_one(users::table.filter(users::id.eq(id)).into_boxed())
            .await
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_one(users::table.filter(users::username.eq(username)).into_boxed())
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let mut conn = self.conn().await?;
        let rows: Vec<UserRow> = users::table
            .order(users::created_at.asc())
            .load(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(users::table.filter(users::id.eq(id)))
            .set(users::is_active.eq(active))
            .execute(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        if !active {
            self.revoke_all_sessions(&mut conn, id).await?;
        }
        Ok(updated > 0)
    }

    pub async fn set_admin(&self, id: &str, admin: bool) -> Result<bool> {
        let role = if admin { "admin" } else { "user" };
        let mut conn = self.conn().await?;
        let updated = diesel::update(users::table.filter(users::id.eq(id)))
            .set((users::is_admin.eq(admin), users::role.eq(role)))
            .execute(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok(updated > 0)
    }

    pub async fn change_password(&self, id: &str, new_password: &str) -> Result<bool> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AvaBotError::Validation(MSG_TOO_SHORT.to_string()));
        }
        let candidate = new_password.to_string();
        let rounds = self.hash_rounds;
        let password_hash =
            tokio::task::spawn_blocking(move || password::hash_password(&candidate, rounds))
                .await
                .map_err(|e| AvaBotError::Runtime(e.to_string()))??;
        let mut conn = self.conn().await?;
        let updated = diesel::update(users::table.filter(users::id.eq(id)))
            .set(users::password_hash.eq(&password_hash))
            .execute(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok(updated > 0)
    }

    /// Hard delete, sessions included.
    pub async fn delete_user(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        diesel::delete(user_sessions::table.filter(user_sessions::user_id.eq(id)))
            .execute(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        let deleted = diesel::delete(users::table.filter(users::id.eq(id)))
            .execute(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        if deleted > 0 {
            info!(user_id = id, "user deleted");
        }
        Ok(deleted > 0)
    }

    pub async fn create_session(&self, user_id: &str, client: &ClientInfo) -> Result<String> {
        let token = new_session_token()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();
        let created_at = timestamp(now);
        let expires_at = timestamp(now + TimeDelta::days(self.session_days));
        let row = NewSessionRow {
            id: &id,
            user_id,
            session_token: &token,
            ip_address: client.ip_address.as_deref(),
            user_agent: client.user_agent.as_deref(),
            created_at: &created_at,
            expires_at: &expires_at,
            is_active: true,
        };
        let mut conn = self.conn().await?;
        diesel::insert_into(user_sessions::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok(token)
    }

    /// The owner of an active, unexpired session, if still active itself.
    pub async fn session_user(&self, token: &str) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        let row: Option<UserRow> = user_sessions::table
            .inner_join(users::table)
            .filter(user_sessions::session_token.eq(token))
            .filter(user_sessions::is_active.eq(true))
            .filter(user_sessions::expires_at.gt(timestamp(now())))
            .filter(users::is_active.eq(true))
            .select(users::all_columns)
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok(row.map(User::from))
    }

    pub async fn revoke_session(&self, token: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            user_sessions::table
                .filter(user_sessions::session_token.eq(token))
                .filter(user_sessions::is_active.eq(true)),
        )
        .set(user_sessions::is_active.eq(false))
        .execute(&mut conn)
        .await
        .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok(updated > 0)
    }

    /// Audit failures are logged and swallowed; they never block a login.
    pub async fn log_login_attempt(&self, username: &str, success: bool, client: &ClientInfo) {
        let id = uuid::Uuid::new_v4().to_string();
        let attempted_at = timestamp(now());
        let row = NewLoginAttemptRow {
            id: &id,
            username,
            ip_address: client.ip_address.as_deref(),
            success,
            attempted_at: &attempted_at,
            user_agent: client.user_agent.as_deref(),
        };
        let outcome = async {
            let mut conn = self.conn().await?;
            diesel::insert_into(login_attempts::table)
                .values(&row)
                .execute(&mut conn)
                .await
                .map_err(|e| AvaBotError::Database(e.to_string()))
        }
        .await;
        if let Err(err) = outcome {
            warn!(username, error = %err, "failed to record login attempt");
        }
    }

    pub async fn recent_failed_attempts(&self, username: &str, since_secs: i64) -> Result<i64> {
        let mut conn = self.conn().await?;
        login_attempts::table
            .filter(login_attempts::username.eq(username))
            .filter(login_attempts::success.eq(false))
            .filter(login_attempts::attempted_at.ge(timestamp(now() - TimeDelta::seconds(since_secs))))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))
    }

    pub async fn is_locked_out(&self, username: &str) -> Result<bool> {
        Ok(self
            .recent_failed_attempts(username, LOCKOUT_WINDOW_SECS)
            .await?
            >= MAX_FAILED_LOGINS)
    }

    async fn revoke_all_sessions(&self, conn: &mut SqlitePooledConn<'_>, user_id: &str) -> Result<()> {
        diesel::update(user_sessions::table.filter(user_sessions::user_id.eq(user_id)))
            .set(user_sessions::is_active.eq(false))
            .execute(conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok(())
    }

    async fn find_one(
        &self,
        query: users::BoxedQuery<'_, diesel::sqlite::Sqlite>,
    ) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        let row: Option<UserRow> = query
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok(row.map(User::from))
    }

    async fn require_user(&self, id: &str) -> Result<User> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AvaBotError::Database(format!("user {id} vanished after insert")))
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        crate::db::apply_pragmas_async(&mut conn).await?;
        Ok(conn)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn new_session_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    let mut rng = SysRng;
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = crate::db::open_sync(&database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok::<_, AvaBotError>(())
    })
    .await
    .map_err(|e| AvaBotError::Runtime(e.to_string()))??;
    Ok(())
}

/// Databases written by earlier deployments may lack `role` and
/// `last_login`, leave columns NULL that the store reads as required, or
/// store timestamps with a space instead of `T`.
async fn repair_legacy_columns(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = crate::db::open_sync(&database_url)?;
        for statement in [
            "ALTER TABLE users ADD COLUMN role TEXT NOT NULL DEFAULT 'user'",
            "ALTER TABLE users ADD COLUMN last_login TEXT",
        ] {
            if let Err(err) =
                diesel::connection::SimpleConnection::batch_execute(&mut conn, statement)
            {
                let message = err.to_string().to_ascii_lowercase();
                if !message.contains("duplicate column name") {
                    return Err(AvaBotError::Database(err.to_string()));
                }
            }
        }
        diesel::connection::SimpleConnection::batch_execute(&mut conn, LEGACY_NORMALIZATION)
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
        Ok::<_, AvaBotError>(())
    })
    .await
    .map_err(|e| AvaBotError::Runtime(e.to_string()))??;
    Ok(())
}

const LEGACY_NORMALIZATION: &str = "
UPDATE users SET email = username || '@ava.local' WHERE email IS NULL OR email = '';
UPDATE users SET is_admin = 0 WHERE is_admin IS NULL;
UPDATE users SET is_active = 1 WHERE is_active IS NULL;
UPDATE users SET role = CASE WHEN is_admin = 1 THEN 'admin' ELSE 'user' END WHERE role IS NULL;
UPDATE users SET created_at = strftime('%Y-%m-%dT%H:%M:%f', 'now', 'localtime') WHERE created_at IS NULL;
UPDATE users SET created_at = replace(created_at, ' ', 'T') WHERE created_at LIKE '____-__-__ %';
UPDATE users SET last_login = replace(last_login, ' ', 'T') WHERE last_login LIKE '____-__-__ %';
";
