use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncSettingsError {
    #[error("save interval must be > 0 seconds")]
    InvalidSaveInterval,

    #[error("staleness threshold must be > 0 seconds")]
    InvalidStaleAfter,

    #[error("offline max age must be > 0 hours")]
    InvalidOfflineMaxAge,

    #[error("periodic sync interval must be > 0 seconds")]
    InvalidSyncEvery,
}

//
// ─── SETTINGS ──────────────────────────────────────────────────────────────────
//

/// Tuning knobs for progress synchronization.
///
/// The defaults mirror the behavior of the lesson player: debounced saves
/// every 30 seconds, cached reads trusted for 60 seconds, offline records
/// discarded after a day, and a background reconcile every five minutes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    auto_save: bool,
    sync_on_mount: bool,
    save_interval_secs: u32,
    stale_after_secs: u32,
    offline_max_age_hours: u32,
    sync_every_secs: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_save: true,
            sync_on_mount: true,
            save_interval_secs: 30,
            stale_after_secs: 60,
            offline_max_age_hours: 24,
            sync_every_secs: 300,
        }
    }
}

impl SyncSettings {
    /// Creates custom sync settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any interval is zero.
    pub fn new(
        auto_save: bool,
        sync_on_mount: bool,
        save_interval_secs: u32,
        stale_after_secs: u32,
        offline_max_age_hours: u32,
        sync_every_secs: u32,
    ) -> Result<Self, SyncSettingsError> {
        if save_interval_secs == 0 {
            return Err(SyncSettingsError::InvalidSaveInterval);
        }
        if stale_after_secs == 0 {
            return Err(SyncSettingsError::InvalidStaleAfter);
        }
        if offline_max_age_hours == 0 {
            return Err(SyncSettingsError::InvalidOfflineMaxAge);
        }
        if sync_every_secs == 0 {
            return Err(SyncSettingsError::InvalidSyncEvery);
        }

        Ok(Self {
            auto_save,
            sync_on_mount,
            save_interval_secs,
            stale_after_secs,
            offline_max_age_hours,
            sync_every_secs,
        })
    }

    #[must_use]
    pub fn auto_save(&self) -> bool {
        self.auto_save
    }

    #[must_use]
    pub fn sync_on_mount(&self) -> bool {
        self.sync_on_mount
    }

    /// Quiet period before a debounced flush fires.
    #[must_use]
    pub fn save_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.save_interval_secs))
    }

    /// Age past which a cached record is re-fetched during bulk sync.
    #[must_use]
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.stale_after_secs))
    }

    /// Age past which an offline record is skipped (not trusted) when flushing.
    #[must_use]
    pub fn offline_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.offline_max_age_hours))
    }

    /// Interval between periodic bulk reconciliations.
    #[must_use]
    pub fn sync_every(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.sync_every_secs))
    }

    /// Disable automatic debounced saving (explicit `save_now` only).
    #[must_use]
    pub fn with_auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }

    /// Disable the authoritative read on session start.
    #[must_use]
    pub fn with_sync_on_mount(mut self, sync_on_mount: bool) -> Self {
        self.sync_on_mount = sync_on_mount;
        self
    }

    /// Override the debounce quiet period.
    ///
    /// # Errors
    ///
    /// Returns `SyncSettingsError::InvalidSaveInterval` for zero.
    pub fn with_save_interval_secs(mut self, secs: u32) -> Result<Self, SyncSettingsError> {
        if secs == 0 {
            return Err(SyncSettingsError::InvalidSaveInterval);
        }
        self.save_interval_secs = secs;
        Ok(self)
    }

    /// Override the cache staleness threshold.
    ///
    /// # Errors
    ///
    /// Returns `SyncSettingsError::InvalidStaleAfter` for zero.
    pub fn with_stale_after_secs(mut self, secs: u32) -> Result<Self, SyncSettingsError> {
        if secs == 0 {
            return Err(SyncSettingsError::InvalidStaleAfter);
        }
        self.stale_after_secs = secs;
        Ok(self)
    }

    /// Override the offline record discard threshold.
    ///
    /// # Errors
    ///
    /// Returns `SyncSettingsError::InvalidOfflineMaxAge` for zero.
    pub fn with_offline_max_age_hours(mut self, hours: u32) -> Result<Self, SyncSettingsError> {
        if hours == 0 {
            return Err(SyncSettingsError::InvalidOfflineMaxAge);
        }
        self.offline_max_age_hours = hours;
        Ok(self)
    }

    /// Override the periodic reconcile interval.
    ///
    /// # Errors
    ///
    /// Returns `SyncSettingsError::InvalidSyncEvery` for zero.
    pub fn with_sync_every_secs(mut self, secs: u32) -> Result<Self, SyncSettingsError> {
        if secs == 0 {
            return Err(SyncSettingsError::InvalidSyncEvery);
        }
        self.sync_every_secs = secs;
        Ok(self)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_player_behavior() {
        let settings = SyncSettings::default();
        assert!(settings.auto_save());
        assert!(settings.sync_on_mount());
        assert_eq!(settings.save_interval().as_secs(), 30);
        assert_eq!(settings.stale_after(), chrono::Duration::seconds(60));
        assert_eq!(settings.offline_max_age(), chrono::Duration::hours(24));
        assert_eq!(settings.sync_every().as_secs(), 300);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        assert_eq!(
            SyncSettings::new(true, true, 0, 60, 24, 300).unwrap_err(),
            SyncSettingsError::InvalidSaveInterval
        );
        assert_eq!(
            SyncSettings::default()
                .with_stale_after_secs(0)
                .unwrap_err(),
            SyncSettingsError::InvalidStaleAfter
        );
        assert_eq!(
            SyncSettings::default()
                .with_offline_max_age_hours(0)
                .unwrap_err(),
            SyncSettingsError::InvalidOfflineMaxAge
        );
        assert_eq!(
            SyncSettings::default().with_sync_every_secs(0).unwrap_err(),
            SyncSettingsError::InvalidSyncEvery
        );
    }

    #[test]
    fn withers_override_single_fields() {
        let settings = SyncSettings::default()
            .with_auto_save(false)
            .with_save_interval_secs(5)
            .unwrap();
        assert!(!settings.auto_save());
        assert_eq!(settings.save_interval().as_secs(), 5);
        assert_eq!(settings.stale_after(), chrono::Duration::seconds(60));
    }
}
