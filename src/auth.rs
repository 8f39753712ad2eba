//! Roles, the signed-in user, and password hashing.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Direction,
    Secretariat,
    Teacher,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Direction, Role::Secretariat, Role::Teacher];
    /// Roles allowed to create, withdraw and move enrollments.
    pub const ENROLLMENT_STAFF: [Role; 3] = [Role::Admin, Role::Direction, Role::Secretariat];
    /// Roles allowed to change classes, subjects, teachers and assignments.
    pub const MANAGEMENT: [Role; 2] = [Role::Admin, Role::Direction];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Direction => "direction",
            Role::Secretariat => "secretariat",
            Role::Teacher => "enseignant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "admin" => Some(Role::Admin),
            "direction" => Some(Role::Direction),
            "secretariat" => Some(Role::Secretariat),
            "enseignant" => Some(Role::Teacher),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Admin => "Administrateur",
            Role::Direction => "Direction",
            Role::Secretariat => "Secrétariat",
            Role::Teacher => "Enseignant",
        }
    }

    pub fn can_enroll(self) -> bool {
        Self::ENROLLMENT_STAFF.contains(&self)
    }

    pub fn can_manage(self) -> bool {
        Self::MANAGEMENT.contains(&self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub school_id: Option<i64>,
}

/// Hashes a password into a PHC string (argon2id, random salt).
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash password: {e}"))?;
    Ok(hash.to_string())
}

/// False for a wrong password and for a stored value that is not a PHC string.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_stored_as_salted_argon2_phc() {
        let h = hash_password("motdepasse").expect("hash");
        assert!(h.starts_with("$argon2id$"), "{h}");
        assert!(verify_password("motdepasse", &h));
        assert!(!verify_password("Motdepasse", &h));

        let again = hash_password("motdepasse").expect("hash");
        assert_ne!(h, again);
        assert!(verify_password("motdepasse", &again));
    }

    #[test]
    fn bare_digests_never_verify() {
        use sha2::{Digest, Sha256};
        let digest = hex::encode(Sha256::digest(b"salt:motdepasse"));
        assert!(!verify_password("motdepasse", &digest));
        assert!(!verify_password("motdepasse", ""));
    }

    #[test]
    fn roles_parse_their_storage_names() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert!(Role::Secretariat.can_enroll());
        assert!(!Role::Secretariat.can_manage());
        assert!(!Role::Teacher.can_enroll());
    }
}
