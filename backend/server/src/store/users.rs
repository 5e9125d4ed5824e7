use chrono::Utc;
use uuid::Uuid;

use super::{Store, Tables};
use crate::{
    error::AppError,
    models::{DEFAULT_AVATAR, User, UserId},
};

pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_username: String,
    pub avatar: Option<String>,
    pub age: u8,
    pub city: String,
    pub phone_number: String,
    pub is_staff: bool,
}

#[derive(Default)]
pub struct ProfileUpdate {
    pub full_username: Option<String>,
    pub avatar: Option<String>,
    pub age: Option<u8>,
    pub city: Option<String>,
    pub phone_number: Option<String>,
}

impl Tables {
    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        let email = email.trim().to_lowercase();
        self.users.values().find(|u| u.email == email)
    }

    fn phone_taken(&self, phone: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.phone_number == phone && Some(u.id) != except)
    }
}

impl Store {
    pub fn create_user(&self, new: NewUser) -> Result<User, AppError> {
        let mut tables = self.write();
        let email = new.email.trim().to_lowercase();

        if tables.user_by_email(&email).is_some() {
            return Err(AppError::validation("A user with this email already exists."));
        }
        if tables.phone_taken(&new.phone_number, None) {
            return Err(AppError::validation("A user with this phone number already exists."));
        }

        let user = User {
            id: Uuid::new_v4(),
            email,
            password_hash: Some(new.password_hash),
            full_username: new.full_username,
            avatar: new.avatar.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            age: new.age,
            city: new.city,
            phone_number: new.phone_number,
            is_staff: new.is_staff,
            created_at: Utc::now(),
        };

        tables.users.insert(user.id, user.clone());

        Ok(user)
    }

    pub fn update_profile(&self, id: UserId, update: ProfileUpdate) -> Result<User, AppError> {
        let mut tables = self.write();

        if let Some(phone) = &update.phone_number {
            if tables.phone_taken(phone, Some(id)) {
                return Err(AppError::validation("A user with this phone number already exists."));
            }
        }

        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("User not found."))?;

        if let Some(name) = update.full_username {
            user.full_username = name;
        }
        if let Some(avatar) = update.avatar {
            user.avatar = avatar;
        }
        if let Some(age) = update.age {
            user.age = age;
        }
        if let Some(city) = update.city {
            user.city = city;
        }
        if let Some(phone) = update.phone_number {
            user.phone_number = phone;
        }

        Ok(user.clone())
    }

    pub fn set_password(&self, id: UserId, password_hash: String) -> Result<(), AppError> {
        let mut tables = self.write();
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("User not found."))?;

        user.password_hash = Some(password_hash);

        Ok(())
    }
}
