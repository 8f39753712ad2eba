use rusqlite::{Connection, OptionalExtension};

use crate::auth::{hash_password, verify_password, CurrentUser, Role};

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub role: Role,
    pub school_id: Option<i64>,
    pub password: &'a str,
}

pub fn create_user(conn: &Connection, user: &NewUser<'_>) -> anyhow::Result<i64> {
    let email = user.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        anyhow::bail!("invalid email: {:?}", user.email);
    }
    if user.name.trim().is_empty() {
        anyhow::bail!("name must not be empty");
    }
    if user.password.len() < 8 {
        anyhow::bail!("password must be at least 8 characters");
    }
    let hash = hash_password(user.password)?;
    conn.execute(
        "INSERT INTO utilisateurs(
           ecole_id, email, nom, role, mot_de_passe_hash, actif, created_at
         ) VALUES(?, ?, ?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            user.school_id,
            &email,
            user.name.trim(),
            user.role.as_str(),
            &hash,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns the user when the email exists, the account is active and the password matches.
pub fn verify_login(
    conn: &Connection,
    email: &str,
    password: &str,
) -> rusqlite::Result<Option<CurrentUser>> {
    let row: Option<(i64, Option<i64>, String, String, String, String)> = conn
        .query_row(
            "SELECT id, ecole_id, email, nom, role, mot_de_passe_hash
             FROM utilisateurs WHERE email = ? AND actif = 1",
            [email.trim().to_lowercase()],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()?;
    let Some((id, school_id, email, name, role, hash)) = row else {
        return Ok(None);
    };
    if !verify_password(password, &hash) {
        return Ok(None);
    }
    let Some(role) = Role::parse(&role) else {
        return Ok(None);
    };
    Ok(Some(CurrentUser {
        user_id: id,
        email,
        name,
        role,
        school_id,
    }))
}

pub fn attach_school(conn: &Connection, user_id: i64, school_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE utilisateurs SET ecole_id = ? WHERE id = ?",
        (school_id, user_id),
    )?;
    Ok(())
}
