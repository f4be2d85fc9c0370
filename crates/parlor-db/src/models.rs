use parlor_types::models::User;

/// Database row types that carry columns the API models must never expose.
/// Distinct from parlor-types models to keep credentials inside the DB layer.
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            created_at: crate::parse_timestamp(&self.created_at),
        }
    }
}
