//! # Accounts
//!
//! Users, Argon2id credentials and bearer sessions. A session token is an
//! opaque UUID; resolving it yields the [`Actor`] every core operation takes.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{is_unique_violation, ApprovalError, Result};
use crate::types::{now_millis, Actor, Role, Session};

/// PHC-format Argon2id hash with a fresh random salt.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApprovalError::Validation(format!("cannot hash password: {e}")))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Unreadable password hash: {e}");
            false
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Insert a user without any permission check. Used for bootstrap and tests.
pub async fn create_user(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<Actor> {
    let name = name.trim();
    let email = normalize_email(email);
    if name.is_empty() {
        return Err(ApprovalError::Validation("name must not be empty".into()));
    }
    if !email.contains('@') {
        return Err(ApprovalError::Validation(format!("invalid email `{email}`")));
    }
    if password.is_empty() {
        return Err(ApprovalError::Validation("password must not be empty".into()));
    }

    let password_hash = hash_password(password)?;
    let result = sqlx::query(
        r#"
        INSERT INTO users (name, email, password_hash, role, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(name)
    .bind(&email)
    .bind(&password_hash)
    .bind(role)
    .bind(now_millis())
    .execute(pool)
    .await;

    let id = match result {
        Ok(done) => done.last_insert_rowid(),
        Err(e) if is_unique_violation(&e) => {
            return Err(ApprovalError::Validation(format!(
                "email `{email}` is already registered"
            )))
        }
        Err(e) => return Err(e.into()),
    };

    info!("Created user {id} with role {role}");
    Ok(Actor {
        id,
        name: name.to_string(),
        role,
    })
}

/// Administrator-only user registration.
pub async fn register_user(
    pool: &SqlitePool,
    admin: &Actor,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<Actor> {
    if admin.role != Role::Administrator {
        return Err(ApprovalError::PermissionDenied(format!(
            "role {} may not register users",
            admin.role
        )));
    }
    create_user(pool, name, email, password, role).await
}

pub async fn has_administrator(pool: &SqlitePool) -> Result<bool> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = ?1")
        .bind(Role::Administrator)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

#[derive(sqlx::FromRow)]
struct Credential {
    id: i64,
    name: String,
    role: Role,
    password_hash: String,
}

/// Check credentials and open a session valid for `ttl_millis`.
pub async fn login(pool: &SqlitePool, email: &str, password: &str, ttl_millis: i64) -> Result<Session> {
    let email = normalize_email(email);
    let credential = sqlx::query_as::<_, Credential>(
        "SELECT id, name, role, password_hash FROM users WHERE email = ?1",
    )
    .bind(&email)
    .fetch_optional(pool)
    .await?;

    let Some(credential) =
        credential.filter(|c| verify_password(password, &c.password_hash))
    else {
        warn!("Failed login for {email}");
        return Err(ApprovalError::PermissionDenied("invalid email or password".into()));
    };

    let now = now_millis();
    let token = Uuid::new_v4().to_string();
    let expires_at = now + ttl_millis;
    sqlx::query("INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(&token)
        .bind(credential.id)
        .bind(now)
        .bind(expires_at)
        .execute(pool)
        .await?;

    info!("User {} logged in", credential.id);
    Ok(Session {
        token,
        actor: Actor {
            id: credential.id,
            name: credential.name,
            role: credential.role,
        },
        expires_at,
    })
}

/// Actor behind a live session token.
pub async fn resolve_session(pool: &SqlitePool, token: &str) -> Result<Actor> {
    let actor = sqlx::query_as::<_, Actor>(
        r#"
        SELECT u.id, u.name, u.role
        FROM   sessions s
        JOIN   users u ON u.id = s.user_id
        WHERE  s.token = ?1 AND s.expires_at > ?2
        "#,
    )
    .bind(token)
    .bind(now_millis())
    .fetch_optional(pool)
    .await?;
    actor.ok_or_else(|| ApprovalError::PermissionDenied("invalid or expired session".into()))
}

pub async fn logout(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete expired sessions; returns how many were removed.
pub async fn prune_expired_sessions(pool: &SqlitePool) -> Result<u64> {
    let removed = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
        .bind(now_millis())
        .execute(pool)
        .await?
        .rows_affected();
    Ok(removed)
}

/// Display name of a user, used to denormalise history and remark rows.
pub async fn display_name(conn: &mut SqliteConnection, user_id: i64) -> Result<String> {
    let row: Option<(String,)> = sqlx::query_as("SELECT name FROM users WHERE id = ?1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|(name,)| name).unwrap_or_else(|| format!("user #{user_id}")))
}
