//! Room manager: owns the set of named rooms and their admission rules.

use std::collections::HashMap;

use crate::error::AdmissionError;
use crate::room::{password_matches, Room};

#[derive(Default)]
pub struct RoomManager {
    rooms: HashMap<String, Room>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, room: Room) {
        self.rooms.insert(room.name.clone(), room);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Room> {
        self.rooms.get_mut(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.values_mut()
    }

    /// Create a dynamic channel. Fails when the name collides or violates
    /// the naming rule; the creator becomes sole member and implicit owner.
    pub fn create_channel(
        &mut self,
        name: &str,
        owner: &str,
        password: Option<String>,
        history_limit: usize,
        external_messages: bool,
    ) -> Result<(), AdmissionError> {
        if self.rooms.contains_key(name) {
            return Err(AdmissionError::NameTaken(name.to_string()));
        }
        if !Room::is_valid_name(name) {
            return Err(AdmissionError::InvalidName(name.to_string()));
        }
        self.insert(Room::channel(
            name,
            owner,
            password,
            history_limit,
            external_messages,
        ));
        Ok(())
    }

    /// The admission protocol, without mutating anything.
    pub fn check_join(
        &self,
        name: &str,
        identity: &str,
        password: Option<&str>,
    ) -> Result<(), AdmissionError> {
        let Some(room) = self.rooms.get(name) else {
            return Err(AdmissionError::NoSuchRoom(name.to_string()));
        };
        if room.member_kind(identity).is_some() {
            return Err(AdmissionError::AlreadyMember(name.to_string()));
        }
        if room.secret {
            if !password_matches(room.password.as_deref(), password.unwrap_or("")) {
                return Err(AdmissionError::WrongPassword(name.to_string()));
            }
        } else if room.is_world && room.is_private {
            // the world went private because a member claimed admin
            if !password_matches(room.admin_password.as_deref(), password.unwrap_or("")) {
                return Err(AdmissionError::PasswordRequired(name.to_string()));
            }
        }
        Ok(())
    }

    /// Admit an identity after the admission checks pass.
    pub fn join(
        &mut self,
        name: &str,
        identity: &str,
        password: Option<&str>,
    ) -> Result<(), AdmissionError> {
        self.check_join(name, identity, password)?;
        self.rooms
            .get_mut(name)
            .expect("room checked above")
            .add_user(identity);
        Ok(())
    }

    /// Remove a user member; fails descriptively without touching state.
    pub fn leave(&mut self, name: &str, identity: &str) -> Result<(), AdmissionError> {
        let Some(room) = self.rooms.get_mut(name) else {
            return Err(AdmissionError::NoSuchRoom(name.to_string()));
        };
        if !room.has_user(identity) {
            return Err(AdmissionError::NotAMember(name.to_string()));
        }
        room.remove_member(identity);
        Ok(())
    }

    /// Names (without the prefix) of all worlds currently private.
    pub fn private_world_names(&self) -> Vec<String> {
        self.rooms
            .values()
            .filter(|room| room.is_private)
            .map(|room| room.name.trim_start_matches('#').to_string())
            .collect()
    }

    /// Rooms whose admin seat is held by the given identity.
    pub fn rooms_administered_by(&self, identity: &str) -> Vec<String> {
        self.rooms
            .values()
            .filter(|room| room.world_admin.as_deref() == Some(identity))
            .map(|room| room.name.clone())
            .collect()
    }

    /// Rooms the identity is currently a member of.
    pub fn rooms_with_member(&self, identity: &str) -> Vec<String> {
        self.rooms
            .values()
            .filter(|room| room.member_kind(identity).is_some())
            .map(|room| room.name.clone())
            .collect()
    }
}
