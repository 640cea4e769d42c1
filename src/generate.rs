//! Random credentials and resource-name suffixes

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Appended to admin passwords: one symbol, one digit, one upper, one lower
const ADMIN_PASSWORD_SUFFIX: &str = "!7Aa";
/// Appended to database passwords; the API only accepts alphanumerics
const DB_PASSWORD_SUFFIX: &str = "A1";

const ADMIN_PASSWORD_LEN: usize = 16;
const DB_PASSWORD_LEN: usize = 24;
const SUFFIX_LEN: usize = 6;

const DB_NAME_MAX: usize = 64;
const DB_USER_MAX: usize = 32;

const ADMIN_SYMBOLS: &[char] = &['!', '@', '#', '%', '^', '*', '-', '_', '+', '='];

/// Database created alongside a WordPress app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DatabaseCredentials {
    pub fn generate(app_name: &str, suffix: &str) -> Self {
        Self {
            name: db_name(app_name, suffix),
            user: db_user(app_name, suffix),
            password: db_password(),
        }
    }
}

/// Random admin password from letters, digits and symbols
pub fn admin_password() -> String {
    let mut rng = rand::thread_rng();
    let mut password: String = (0..ADMIN_PASSWORD_LEN)
        .map(|_| {
            if rng.gen_ratio(1, 5) {
                ADMIN_SYMBOLS[rng.gen_range(0..ADMIN_SYMBOLS.len())]
            } else {
                rng.sample(Alphanumeric) as char
            }
        })
        .collect();
    password.push_str(ADMIN_PASSWORD_SUFFIX);
    password
}

/// Alphanumeric database password
pub fn db_password() -> String {
    let mut password = alphanumeric(DB_PASSWORD_LEN);
    password.push_str(DB_PASSWORD_SUFFIX);
    password
}

/// Lowercase alphanumeric suffix used to make resource names unique
pub fn unique_suffix() -> String {
    alphanumeric(SUFFIX_LEN).to_lowercase()
}

/// `<app>_<suffix>` limited to the database name length
pub fn db_name(app_name: &str, suffix: &str) -> String {
    scoped_name(app_name, suffix, DB_NAME_MAX)
}

/// `<app>_<suffix>` limited to the database user length
pub fn db_user(app_name: &str, suffix: &str) -> String {
    scoped_name(app_name, suffix, DB_USER_MAX)
}

fn alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn scoped_name(app_name: &str, suffix: &str, max: usize) -> String {
    let mut base: String = app_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if base.is_empty() {
        base.push_str("app");
    }
    let room = max.saturating_sub(suffix.len() + 1);
    base.truncate(room);
    format!("{}_{}", base, suffix)
}
