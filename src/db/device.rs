//! Device repository

use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// Device enrollment lifecycle state. Transitions are monotonic:
/// created -> enrolled -> disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    /// Registered, OTP issued, no certificate signed yet
    Created,
    /// A certificate has been signed for this device
    Enrolled,
    /// Device is retired; runtime requests must be rejected
    Disabled,
}

impl EnrollmentStatus {
    /// Status string as stored in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Enrolled => "enrolled",
            Self::Disabled => "disabled",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "enrolled" => Ok(Self::Enrolled),
            "disabled" => Ok(Self::Disabled),
            other => Err(Error::Database(format!(
                "unknown enrollment status: {other}"
            ))),
        }
    }
}

/// A device
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub otp: Option<String>,
    pub status: EnrollmentStatus,
}

impl Device {
    /// Create a new device record in the `created` state
    #[must_use]
    pub fn new(user_id: &str, name: &str, otp: &str) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: Some(user_id.to_string()),
            name: name.to_string(),
            otp: Some(otp.to_string()),
            status: EnrollmentStatus::Created,
        }
    }
}

/// Device repository
#[derive(Clone)]
pub struct DeviceRepo {
    pool: DbPool,
}

impl DeviceRepo {
    /// Create a new device repository
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new device
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn save(&self, device: &Device) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO devices (id, user_id, name, otp, enrollment_status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                device.id,
                device.user_id,
                device.name,
                device.otp,
                device.status.as_str(),
            ],
        )?;

        Ok(())
    }

    /// Find a device by id
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no such device exists
    pub fn find(&self, id: &str) -> Result<Device> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let row = conn
            .query_row(
                "SELECT id, user_id, name, otp, enrollment_status
                 FROM devices WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::DeviceNotFound,
                e => Error::Sqlite(e),
            })?;

        Ok(Device {
            id: row.0,
            user_id: row.1,
            name: row.2,
            otp: row.3,
            status: EnrollmentStatus::parse(&row.4)?,
        })
    }

    /// List all devices owned by a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_user(&self, user_id: &str) -> Result<Vec<Device>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, otp, enrollment_status
             FROM devices WHERE user_id = ?1 ORDER BY created_at",
        )?;

        let rows = stmt.query_map([user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut devices = Vec::new();
        for row in rows {
            let row = row?;
            devices.push(Device {
                id: row.0,
                user_id: row.1,
                name: row.2,
                otp: row.3,
                status: EnrollmentStatus::parse(&row.4)?,
            });
        }

        Ok(devices)
    }

    /// Mark a device enrolled and invalidate its OTP in one statement.
    /// The OTP is single-use: once enrollment succeeds it must never
    /// match again.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no such device exists
    pub fn mark_enrolled(&self, id: &str) -> Result<()> {
        self.set_status(id, EnrollmentStatus::Enrolled, true)
    }

    /// Mark a device disabled
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no such device exists
    pub fn mark_disabled(&self, id: &str) -> Result<()> {
        self.set_status(id, EnrollmentStatus::Disabled, false)
    }

    fn set_status(&self, id: &str, status: EnrollmentStatus, clear_otp: bool) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let changed = if clear_otp {
            conn.execute(
                "UPDATE devices SET enrollment_status = ?1, otp = NULL WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )?
        } else {
            conn.execute(
                "UPDATE devices SET enrollment_status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )?
        };

        if changed == 0 {
            return Err(Error::DeviceNotFound);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user::User;
    use crate::db::{init_memory, UserRepo};

    fn setup() -> (UserRepo, DeviceRepo, String) {
        let pool = init_memory().unwrap();
        let users = UserRepo::new(pool.clone());
        let devices = DeviceRepo::new(pool);

        let user = User::new_local("owner@x.io", "Owner", "One", "hash");
        users.save(&user).unwrap();

        (users, devices, user.id)
    }

    #[test]
    fn test_save_and_find_device() {
        let (_, devices, user_id) = setup();

        let device = Device::new(&user_id, "Pi", "secret-otp");
        devices.save(&device).unwrap();

        let found = devices.find(&device.id).unwrap();
        assert_eq!(found.name, "Pi");
        assert_eq!(found.status, EnrollmentStatus::Created);
        assert_eq!(found.otp.as_deref(), Some("secret-otp"));
        assert_eq!(found.user_id.as_deref(), Some(user_id.as_str()));
    }

    #[test]
    fn test_mark_enrolled_clears_otp() {
        let (_, devices, user_id) = setup();

        let device = Device::new(&user_id, "Pi", "secret-otp");
        devices.save(&device).unwrap();

        devices.mark_enrolled(&device.id).unwrap();

        let found = devices.find(&device.id).unwrap();
        assert_eq!(found.status, EnrollmentStatus::Enrolled);
        assert!(found.otp.is_none());
    }

    #[test]
    fn test_mark_disabled() {
        let (_, devices, user_id) = setup();

        let device = Device::new(&user_id, "Pi", "otp");
        devices.save(&device).unwrap();
        devices.mark_enrolled(&device.id).unwrap();
        devices.mark_disabled(&device.id).unwrap();

        let found = devices.find(&device.id).unwrap();
        assert_eq!(found.status, EnrollmentStatus::Disabled);
    }

    #[test]
    fn test_find_missing_device() {
        let (_, devices, _) = setup();
        assert!(matches!(devices.find("nope"), Err(Error::DeviceNotFound)));
        assert!(matches!(
            devices.mark_enrolled("nope"),
            Err(Error::DeviceNotFound)
        ));
    }

    #[test]
    fn test_find_by_user() {
        let (_, devices, user_id) = setup();

        devices.save(&Device::new(&user_id, "Pi 1", "otp1")).unwrap();
        devices.save(&Device::new(&user_id, "Pi 2", "otp2")).unwrap();

        let list = devices.find_by_user(&user_id).unwrap();
        assert_eq!(list.len(), 2);
    }
}
