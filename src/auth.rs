//! Phone-number sign-in with one-time codes.
//!
//! A six-digit code is generated locally, sent through the SMS gateway and
//! kept only as a bcrypt hash in `local_settings` (category "otp", keyed by
//! the normalized phone number) together with its send time, expiry and
//! attempt counter. Too many wrong codes lock the number out for a while;
//! the lockout is persisted so restarting the app does not reset it.
//!
//! A verified code creates (or reuses) the user's profile and stores the
//! session in `local_settings` (category "auth") so it survives restarts.
//! A phone unknown on this device is looked up in the remote `profiles`
//! collection first, so a reinstall or a second device keeps the same
//! user id and sees the same ledger.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::db::{self, DbState};
use crate::error::{Error, Result};
use crate::firestore::RemoteStore;
use crate::models::{EntityKind, OperationKind, Profile};
use crate::sms::SmsGateway;
use crate::sync;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const OTP_CATEGORY: &str = "otp";
const AUTH_CATEGORY: &str = "auth";
const SESSION_KEY: &str = "session";
const LOCKOUT_KEY_PREFIX: &str = "lockout:";

const OTP_LENGTH: usize = 6;
pub const OTP_TTL_SECS: i64 = 300;
const RESEND_COOLDOWN_SECS: i64 = 60;
const MAX_VERIFY_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const MAX_NAME_LEN: usize = 100;

#[cfg(not(test))]
const OTP_HASH_COST: u32 = 8;
#[cfg(test)]
const OTP_HASH_COST: u32 = 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OtpRecord {
    code_hash: String,
    sent_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub phone: String,
    pub name: Option<String>,
    pub logged_in_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpDispatch {
    /// Masked destination, safe to show and log.
    pub phone: String,
    pub expires_in_secs: i64,
}

#[derive(Default)]
pub struct AuthState {
    session: Mutex<Option<Session>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Phone helpers
// ---------------------------------------------------------------------------

/// Normalize a Nepali mobile number to its ten local digits.
///
/// Accepts spaces, dashes and an optional `+977`/`977` prefix. The result
/// must start with `97` or `98`.
pub fn normalize_mobile(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let local = match digits.len() {
        13 if digits.starts_with("977") => &digits[3..],
        _ => digits.as_str(),
    };
    if local.len() != 10 || !(local.starts_with("97") || local.starts_with("98")) {
        return Err(Error::validation(
            "Enter a valid 10-digit Nepali mobile number starting with 97 or 98",
        ));
    }
    Ok(local.to_string())
}

/// `9841234567` -> `98******67`.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 4))
}

fn generate_code() -> Zeroizing<String> {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    Zeroizing::new(format!("{n:0width$}", width = OTP_LENGTH))
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

fn load_record(conn: &Connection, phone: &str) -> Option<OtpRecord> {
    db::get_setting(conn, OTP_CATEGORY, phone).and_then(|raw| serde_json::from_str(&raw).ok())
}

fn store_record(conn: &Connection, phone: &str, record: &OtpRecord) -> Result<()> {
    db::set_setting(conn, OTP_CATEGORY, phone, &serde_json::to_string(record)?)
}

fn clear_record(conn: &Connection, phone: &str) -> Result<()> {
    db::delete_setting(conn, OTP_CATEGORY, phone)
}

fn lockout_key(phone: &str) -> String {
    format!("{LOCKOUT_KEY_PREFIX}{phone}")
}

fn check_lockout(conn: &Connection, phone: &str, now: DateTime<Utc>) -> Result<()> {
    let until = db::get_setting(conn, AUTH_CATEGORY, &lockout_key(phone))
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc));
    match until {
        Some(until) if now < until => {
            let remaining = (until - now).num_minutes() + 1;
            Err(Error::Auth(format!(
                "Too many incorrect attempts. Try again in {remaining} minute(s)."
            )))
        }
        Some(_) => db::delete_setting(conn, AUTH_CATEGORY, &lockout_key(phone)),
        None => Ok(()),
    }
}

fn profile_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn find_profile(conn: &Connection, phone: &str) -> Result<Option<Profile>> {
    Ok(conn
        .query_row(
            "SELECT id, phone, name, created_at, updated_at FROM profiles WHERE phone = ?1",
            params![phone],
            profile_from_row,
        )
        .optional()?)
}

/// The oldest remote profile registered for `phone`.
pub async fn find_remote_profile(remote: &dyn RemoteStore, phone: &str) -> Result<Option<Profile>> {
    let docs = remote
        .query_by_field(EntityKind::Profile.collection(), "phone", phone)
        .await?;
    let mut profiles: Vec<Profile> = docs
        .into_iter()
        .filter_map(|doc| match serde_json::from_value::<Profile>(doc) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "ignoring malformed remote profile");
                None
            }
        })
        .filter(|profile| profile.phone == phone && !profile.id.is_empty())
        .collect();
    profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(profiles.into_iter().next())
}

fn insert_profile(conn: &Connection, profile: &Profile) -> Result<()> {
    conn.execute(
        "INSERT INTO profiles (id, phone, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            profile.id,
            profile.phone,
            profile.name,
            profile.created_at,
            profile.updated_at
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileOrigin {
    Local,
    Remote,
    Created,
}

/// Local profile for `phone`, else the remote one adopted locally, else a
/// freshly inserted one.
fn upsert_profile(
    conn: &Connection,
    phone: &str,
    remote_profile: Option<Profile>,
    now: DateTime<Utc>,
) -> Result<(Profile, ProfileOrigin)> {
    if let Some(profile) = find_profile(conn, phone)? {
        return Ok((profile, ProfileOrigin::Local));
    }
    if let Some(profile) = remote_profile {
        insert_profile(conn, &profile)?;
        return Ok((profile, ProfileOrigin::Remote));
    }
    let stamp = now.to_rfc3339();
    let profile = Profile {
        id: Uuid::new_v4().to_string(),
        phone: phone.to_string(),
        name: None,
        created_at: stamp.clone(),
        updated_at: stamp,
    };
    insert_profile(conn, &profile)?;
    Ok((profile, ProfileOrigin::Created))
}

// ---------------------------------------------------------------------------
// OTP flow
// ---------------------------------------------------------------------------

/// Generate a code for `phone`, store its hash and text it to the user.
pub async fn request_otp<S: SmsGateway + ?Sized>(
    db: &DbState,
    sms: &S,
    phone: &str,
) -> Result<OtpDispatch> {
    request_otp_at(db, sms, phone, Utc::now()).await
}

pub(crate) async fn request_otp_at<S: SmsGateway + ?Sized>(
    db: &DbState,
    sms: &S,
    raw_phone: &str,
    now: DateTime<Utc>,
) -> Result<OtpDispatch> {
    let phone = normalize_mobile(raw_phone)?;
    let code = generate_code();

    {
        let conn = db.conn.lock()?;
        check_lockout(&conn, &phone, now)?;
        if let Some(existing) = load_record(&conn, &phone) {
            let elapsed = (now - existing.sent_at).num_seconds();
            if elapsed < RESEND_COOLDOWN_SECS {
                return Err(Error::Conflict(format!(
                    "Please wait {}s before requesting a new code",
                    RESEND_COOLDOWN_SECS - elapsed
                )));
            }
        }
        let code_hash = bcrypt::hash(code.as_str(), OTP_HASH_COST)
            .map_err(|e| Error::State(format!("could not hash code: {e}")))?;
        store_record(
            &conn,
            &phone,
            &OtpRecord {
                code_hash,
                sent_at: now,
                expires_at: now + Duration::seconds(OTP_TTL_SECS),
                attempts: 0,
            },
        )?;
    }

    let text = Zeroizing::new(format!(
        "Your Mero Hisab verification code is {}. It expires in {} minutes.",
        code.as_str(),
        OTP_TTL_SECS / 60
    ));
    if let Err(e) = sms.send(&phone, &text).await {
        // Without a delivered code the cooldown must not block a retry.
        match db.conn.lock() {
            Ok(conn) => {
                if let Err(clear_err) = clear_record(&conn, &phone) {
                    warn!(error = %clear_err, "could not clear unsent verification code");
                }
            }
            Err(lock_err) => {
                warn!(error = %lock_err, "could not clear unsent verification code");
            }
        }
        return Err(e);
    }

    info!(phone = %mask_phone(&phone), "verification code sent");
    Ok(OtpDispatch {
        phone: mask_phone(&phone),
        expires_in_secs: OTP_TTL_SECS,
    })
}

/// Check `code` for `phone`; on success sign the user in.
///
/// With a remote store, a phone that has no local profile is looked up
/// remotely before the code is checked. A failed lookup returns the error
/// and leaves the code usable for another try.
pub async fn verify_otp(
    db: &DbState,
    auth: &AuthState,
    remote: Option<&dyn RemoteStore>,
    phone: &str,
    code: &str,
) -> Result<Session> {
    let normalized = normalize_mobile(phone)?;
    let known_locally = {
        let conn = db.conn.lock()?;
        find_profile(&conn, &normalized)?.is_some()
    };
    let remote_profile = match remote {
        Some(remote) if !known_locally => find_remote_profile(remote, &normalized).await?,
        _ => None,
    };
    verify_otp_at(db, auth, phone, code, remote_profile, Utc::now())
}

pub(crate) fn verify_otp_at(
    db: &DbState,
    auth: &AuthState,
    raw_phone: &str,
    code: &str,
    remote_profile: Option<Profile>,
    now: DateTime<Utc>,
) -> Result<Session> {
    let phone = normalize_mobile(raw_phone)?;
    let code = Zeroizing::new(code.trim().to_string());
    if code.len() != OTP_LENGTH || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::validation("Enter the 6-digit verification code"));
    }

    let mut conn = db.conn.lock()?;
    check_lockout(&conn, &phone, now)?;

    let mut record = load_record(&conn, &phone).ok_or_else(|| {
        Error::Auth("No verification code was requested for this number".into())
    })?;

    if now >= record.expires_at {
        clear_record(&conn, &phone)?;
        return Err(Error::Auth(
            "Verification code expired. Request a new one.".into(),
        ));
    }

    if !bcrypt::verify(code.as_str(), &record.code_hash).unwrap_or(false) {
        record.attempts += 1;
        warn!(
            phone = %mask_phone(&phone),
            attempts = record.attempts,
            "incorrect verification code"
        );
        if record.attempts >= MAX_VERIFY_ATTEMPTS {
            clear_record(&conn, &phone)?;
            let until = now + Duration::minutes(LOCKOUT_MINUTES);
            db::set_setting(&conn, AUTH_CATEGORY, &lockout_key(&phone), &until.to_rfc3339())?;
            return Err(Error::Auth(format!(
                "Too many incorrect attempts. Try again in {LOCKOUT_MINUTES} minute(s)."
            )));
        }
        store_record(&conn, &phone, &record)?;
        return Err(Error::Auth(format!(
            "Invalid verification code. {} attempt(s) left.",
            MAX_VERIFY_ATTEMPTS - record.attempts
        )));
    }

    let tx = conn.transaction()?;
    clear_record(&tx, &phone)?;
    let (profile, origin) = upsert_profile(&tx, &phone, remote_profile, now)?;
    if origin == ProfileOrigin::Created {
        sync::enqueue(
            &tx,
            OperationKind::Create,
            EntityKind::Profile,
            &profile.id,
            &serde_json::to_value(&profile)?,
        )?;
    }
    let session = Session {
        user_id: profile.id.clone(),
        phone: phone.clone(),
        name: profile.name.clone(),
        logged_in_at: now.to_rfc3339(),
    };
    db::set_setting(&tx, AUTH_CATEGORY, SESSION_KEY, &serde_json::to_string(&session)?)?;
    tx.commit()?;

    *auth.session.lock()? = Some(session.clone());
    info!(phone = %mask_phone(&phone), profile = ?origin, "signed in");
    Ok(session)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub fn current_session(auth: &AuthState) -> Option<Session> {
    auth.session.lock().ok().and_then(|s| s.clone())
}

/// The signed-in user's id, or an auth error.
pub fn require_user(auth: &AuthState) -> Result<String> {
    current_session(auth)
        .map(|s| s.user_id)
        .ok_or_else(|| Error::Auth("Not signed in".into()))
}

/// Load the persisted session into memory.
pub fn restore_session(db: &DbState, auth: &AuthState) -> Result<Option<Session>> {
    let conn = db.conn.lock()?;
    let session: Option<Session> = db::get_setting(&conn, AUTH_CATEGORY, SESSION_KEY)
        .and_then(|raw| serde_json::from_str(&raw).ok());

    // A session whose profile is gone is stale.
    let session = match session {
        Some(s) if find_profile(&conn, &s.phone)?.is_some() => Some(s),
        Some(_) => {
            db::delete_setting(&conn, AUTH_CATEGORY, SESSION_KEY)?;
            None
        }
        None => None,
    };
    *auth.session.lock()? = session.clone();
    Ok(session)
}

pub fn logout(db: &DbState, auth: &AuthState) -> Result<()> {
    let conn = db.conn.lock()?;
    db::delete_setting(&conn, AUTH_CATEGORY, SESSION_KEY)?;
    *auth.session.lock()? = None;
    info!("signed out");
    Ok(())
}

pub fn session_json(auth: &AuthState) -> Value {
    match current_session(auth) {
        Some(session) => serde_json::json!({
            "authenticated": true,
            "userId": session.user_id,
            "phone": mask_phone(&session.phone),
            "name": session.name,
            "loggedInAt": session.logged_in_at,
        }),
        None => serde_json::json!({ "authenticated": false }),
    }
}

/// Set the display name on the signed-in user's profile.
pub fn update_profile_name(db: &DbState, auth: &AuthState, name: &str) -> Result<Profile> {
    let mut session = current_session(auth).ok_or_else(|| Error::Auth("Not signed in".into()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::validation(format!(
            "Name must be at most {MAX_NAME_LEN} characters"
        )));
    }

    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    let now = crate::now_rfc3339();
    let changed = tx.execute(
        "UPDATE profiles SET name = ?1, updated_at = ?2 WHERE id = ?3",
        params![name, now, session.user_id],
    )?;
    if changed == 0 {
        return Err(Error::not_found("Profile"));
    }
    let profile = find_profile(&tx, &session.phone)?.ok_or_else(|| Error::not_found("Profile"))?;
    sync::enqueue(
        &tx,
        OperationKind::Update,
        EntityKind::Profile,
        &profile.id,
        &serde_json::to_value(&profile)?,
    )?;
    session.name = profile.name.clone();
    db::set_setting(&tx, AUTH_CATEGORY, SESSION_KEY, &serde_json::to_string(&session)?)?;
    tx.commit()?;

    *auth.session.lock()? = Some(session);
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryRemote, MemorySms};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn otp_attempts(db: &DbState, phone: &str) -> Option<u32> {
        let conn = db.conn.lock().unwrap();
        load_record(&conn, phone).map(|r| r.attempts)
    }

    fn wrong_code(right: &str) -> String {
        if right == "000000" { "111111".into() } else { "000000".into() }
    }

    #[test]
    fn test_normalize_mobile() {
        assert_eq!(normalize_mobile("9841234567").unwrap(), "9841234567");
        assert_eq!(normalize_mobile("+977 984-123-4567").unwrap(), "9841234567");
        assert_eq!(normalize_mobile("9779741234567").unwrap(), "9741234567");
        assert!(normalize_mobile("9612345678").is_err());
        assert!(normalize_mobile("984123456").is_err());
        assert!(normalize_mobile("01-4412345").is_err());
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("9841234567"), "98******67");
        assert_eq!(mask_phone("98"), "**");
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), OTP_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_request_and_verify_signs_in() {
        let db = DbState::open_in_memory().unwrap();
        let auth = AuthState::new();
        let sms = MemorySms::default();

        let dispatch = request_otp(&db, &sms, "+977-9841234567").await.unwrap();
        assert_eq!(dispatch.phone, "98******67");
        assert_eq!(sms.sent.lock().unwrap()[0].0, "9841234567");

        let code = sms.last_code();
        let session = verify_otp(&db, &auth, None, "9841234567", &code)
            .await
            .unwrap();
        assert_eq!(session.phone, "9841234567");
        assert_eq!(require_user(&auth).unwrap(), session.user_id);

        // Single use.
        let err = verify_otp(&db, &auth, None, "9841234567", &code)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No verification code"));

        let conn = db.conn.lock().unwrap();
        let ops = sync::pending_operations(&conn, false).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].entity, EntityKind::Profile);
    }

    #[tokio::test]
    async fn test_resend_cooldown() {
        let db = DbState::open_in_memory().unwrap();
        let sms = MemorySms::default();
        let start = Utc::now();

        request_otp_at(&db, &sms, "9801234567", start).await.unwrap();
        let err = request_otp_at(&db, &sms, "9801234567", start + Duration::seconds(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m.contains("40s")));

        request_otp_at(&db, &sms, "9801234567", start + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(sms.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let db = DbState::open_in_memory().unwrap();
        let auth = AuthState::new();
        let sms = MemorySms::default();
        let start = Utc::now();

        request_otp_at(&db, &sms, "9801234567", start).await.unwrap();
        let code = sms.last_code();
        let expired_at = start + Duration::seconds(OTP_TTL_SECS);
        let err =
            verify_otp_at(&db, &auth, "9801234567", &code, None, expired_at).unwrap_err();
        assert!(err.to_string().contains("expired"));
        assert!(otp_attempts(&db, "9801234567").is_none());
    }

    #[tokio::test]
    async fn test_wrong_codes_lock_the_number() {
        let db = DbState::open_in_memory().unwrap();
        let auth = AuthState::new();
        let sms = MemorySms::default();
        let start = Utc::now();

        request_otp_at(&db, &sms, "9801234567", start).await.unwrap();
        let right = sms.last_code();
        let wrong = wrong_code(&right);

        let err = verify_otp_at(&db, &auth, "9801234567", &wrong, None, start).unwrap_err();
        assert!(err.to_string().contains("4 attempt(s) left"));
        assert_eq!(otp_attempts(&db, "9801234567"), Some(1));

        for _ in 1..MAX_VERIFY_ATTEMPTS {
            let _ = verify_otp_at(&db, &auth, "9801234567", &wrong, None, start);
        }
        assert!(otp_attempts(&db, "9801234567").is_none());

        // The right code no longer works and new codes are refused.
        let err = verify_otp_at(&db, &auth, "9801234567", &right, None, start).unwrap_err();
        assert!(err.to_string().contains("Too many incorrect attempts"));
        let err = request_otp_at(&db, &sms, "9801234567", start + Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Too many incorrect attempts"));

        request_otp_at(&db, &sms, "9801234567", start + Duration::minutes(LOCKOUT_MINUTES + 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_sms_does_not_start_cooldown() {
        let db = DbState::open_in_memory().unwrap();
        let sms = MemorySms::default();
        sms.fail.store(true, Ordering::SeqCst);
        assert!(request_otp(&db, &sms, "9801234567").await.is_err());
        assert!(otp_attempts(&db, "9801234567").is_none());

        sms.fail.store(false, Ordering::SeqCst);
        request_otp(&db, &sms, "9801234567").await.unwrap();
    }

    #[tokio::test]
    async fn test_session_survives_restart_and_profile_is_reused() {
        let db = DbState::open_in_memory().unwrap();
        let sms = MemorySms::default();
        let start = Utc::now();

        let first = AuthState::new();
        request_otp_at(&db, &sms, "9801234567", start).await.unwrap();
        let session =
            verify_otp_at(&db, &first, "9801234567", &sms.last_code(), None, start).unwrap();
        update_profile_name(&db, &first, "  Sita Sharma ").unwrap();

        let restarted = AuthState::new();
        let restored = restore_session(&db, &restarted).unwrap().unwrap();
        assert_eq!(restored.user_id, session.user_id);
        assert_eq!(restored.name.as_deref(), Some("Sita Sharma"));

        logout(&db, &restarted).unwrap();
        assert!(require_user(&restarted).is_err());
        assert_eq!(session_json(&restarted)["authenticated"], false);

        let later = start + Duration::minutes(2);
        request_otp_at(&db, &sms, "9801234567", later).await.unwrap();
        let again =
            verify_otp_at(&db, &restarted, "9801234567", &sms.last_code(), None, later)
                .unwrap();
        assert_eq!(again.user_id, session.user_id);
        assert_eq!(again.name.as_deref(), Some("Sita Sharma"));
    }

    #[tokio::test]
    async fn test_new_device_adopts_remote_profile() {
        let db = DbState::open_in_memory().unwrap();
        let auth = AuthState::new();
        let sms = MemorySms::default();
        let remote = MemoryRemote::default();
        remote.insert(
            "profiles",
            json!({
                "id": "p-original",
                "phone": "9801234567",
                "name": "Sita Sharma",
                "created_at": "2024-01-05T08:00:00.000Z",
                "updated_at": "2024-01-05T08:00:00.000Z"
            }),
        );
        remote.insert(
            "profiles",
            json!({
                "id": "p-other",
                "phone": "9841111111",
                "name": null,
                "created_at": "2023-01-01T00:00:00.000Z",
                "updated_at": "2023-01-01T00:00:00.000Z"
            }),
        );
        remote.insert(
            "customers",
            json!({ "id": "c-1", "user_id": "p-original", "name": "Hari", "phone": "" }),
        );

        request_otp(&db, &sms, "9801234567").await.unwrap();
        let session = verify_otp(&db, &auth, Some(&remote), "9801234567", &sms.last_code())
            .await
            .unwrap();
        assert_eq!(session.user_id, "p-original");
        assert_eq!(session.name.as_deref(), Some("Sita Sharma"));

        let pulled = sync::pull_remote(&db, &remote, &session.user_id).await.unwrap();
        assert_eq!(pulled.customers, 1);

        // The profile already exists remotely, so nothing is queued for it.
        let conn = db.conn.lock().unwrap();
        assert_eq!(sync::pending_count(&conn), 0);
        assert_eq!(find_profile(&conn, "9801234567").unwrap().unwrap().id, "p-original");
    }

    #[tokio::test]
    async fn test_unreachable_remote_keeps_code_usable() {
        let db = DbState::open_in_memory().unwrap();
        let auth = AuthState::new();
        let sms = MemorySms::default();
        let remote = MemoryRemote::default();

        request_otp(&db, &sms, "9801234567").await.unwrap();
        let code = sms.last_code();
        remote.set_online(false);
        let err = verify_otp(&db, &auth, Some(&remote), "9801234567", &code)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(otp_attempts(&db, "9801234567"), Some(0));

        remote.set_online(true);
        let session = verify_otp(&db, &auth, Some(&remote), "9801234567", &code)
            .await
            .unwrap();
        let conn = db.conn.lock().unwrap();
        let ops = sync::pending_operations(&conn, false).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].entity_id, session.user_id);
    }

    #[test]
    fn test_update_profile_name_requires_session() {
        let db = DbState::open_in_memory().unwrap();
        let auth = AuthState::new();
        assert!(matches!(
            update_profile_name(&db, &auth, "Ram"),
            Err(Error::Auth(_))
        ));
    }
}
