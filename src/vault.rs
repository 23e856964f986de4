//! Vault: per-file encryption and the "opaque to organization" gate.
//!
//! Encrypted files carry the reserved `.enc` suffix and are skipped by the
//! organizer. The on-disk layout is:
//!
//! ```text
//! "TDV1" | salt (16 bytes) | nonce (12 bytes) | ChaCha20-Poly1305 ciphertext + tag
//! ```
//!
//! The key is derived from the password with PBKDF2-HMAC-SHA256 over the per-file
//! salt. Derived keys are recorded in an injected [`KeyStore`], keyed by the
//! original file name, so a file can later be decrypted without the password if
//! the store is persistent.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reserved extension marking vault-encrypted files.
pub const ENCRYPTED_EXTENSION: &str = "enc";

const MAGIC: &[u8; 4] = b"TDV1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// A 256-bit derived file key.
pub type FileKey = [u8; 32];

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Authentication failed for {}: wrong password or tampered data", .path.display())]
    AuthenticationFailure { path: PathBuf },

    #[error("{} is not a vault file: {reason}", .path.display())]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("{} does not carry the .enc suffix", .path.display())]
    NotEncrypted { path: PathBuf },

    #[error("No stored key for '{name}'")]
    MissingKey { name: String },

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("Key store error: {0}")]
    KeyStore(String),
}

impl VaultError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        VaultError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Storage for derived keys, keyed by original file name.
///
/// Loading and flushing are explicit; nothing is read or written implicitly.
pub trait KeyStore: Send {
    fn get(&self, name: &str) -> Option<FileKey>;
    fn put(&mut self, name: &str, key: FileKey);
    fn remove(&mut self, name: &str);
    /// Reads persisted keys, replacing what is held in memory.
    fn load(&mut self) -> Result<(), VaultError>;
    /// Writes held keys to the backing storage.
    fn flush(&self) -> Result<(), VaultError>;
}

/// Keys held in process memory only; lost on exit.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: HashMap<String, FileKey>,
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, name: &str) -> Option<FileKey> {
        self.keys.get(name).copied()
    }

    fn put(&mut self, name: &str, key: FileKey) {
        self.keys.insert(name.to_string(), key);
    }

    fn remove(&mut self, name: &str) {
        self.keys.remove(name);
    }

    fn load(&mut self) -> Result<(), VaultError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), VaultError> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyFile {
    keys: HashMap<String, String>,
}

/// Keys persisted as hex in a JSON file, readable by the owner only.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    keys: HashMap<String, FileKey>,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keys: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self, name: &str) -> Option<FileKey> {
        self.keys.get(name).copied()
    }

    fn put(&mut self, name: &str, key: FileKey) {
        self.keys.insert(name.to_string(), key);
    }

    fn remove(&mut self, name: &str) {
        self.keys.remove(name);
    }

    fn load(&mut self) -> Result<(), VaultError> {
        if !self.path.exists() {
            self.keys.clear();
            return Ok(());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| VaultError::io(&self.path, e))?;
        let file: KeyFile =
            serde_json::from_str(&content).map_err(|e| VaultError::KeyStore(e.to_string()))?;

        let mut keys = HashMap::with_capacity(file.keys.len());
        for (name, encoded) in file.keys {
            let bytes = hex::decode(&encoded).map_err(|e| VaultError::KeyStore(e.to_string()))?;
            let key: FileKey = bytes
                .try_into()
                .map_err(|_| VaultError::KeyStore(format!("invalid key length for '{name}'")))?;
            keys.insert(name, key);
        }
        self.keys = keys;
        Ok(())
    }

    fn flush(&self) -> Result<(), VaultError> {
        let file = KeyFile {
            keys: self
                .keys
                .iter()
                .map(|(name, key)| (name.clone(), hex::encode(key)))
                .collect(),
        };
        let json =
            serde_json::to_string_pretty(&file).map_err(|e| VaultError::KeyStore(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| VaultError::io(parent, e))?;
        }
        fs::write(&self.path, json).map_err(|e| VaultError::io(&self.path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(|e| VaultError::io(&self.path, e))?;
        }

        Ok(())
    }
}

/// Returns true if the path carries the reserved vault suffix.
///
/// This looks at the name only, never at the content.
pub fn is_encrypted(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == ENCRYPTED_EXTENSION)
}

/// Encrypts and decrypts files, recording derived keys in its key store.
pub struct Vault {
    iterations: u32,
    keys: Mutex<Box<dyn KeyStore>>,
}

impl Vault {
    /// Vault with an in-memory key store and the default derivation cost.
    pub fn new() -> Self {
        Self::with_key_store(Box::new(MemoryKeyStore::default()))
    }

    pub fn with_key_store(keys: Box<dyn KeyStore>) -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            keys: Mutex::new(keys),
        }
    }

    /// Overrides the PBKDF2 iteration count.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn is_encrypted(&self, path: &Path) -> bool {
        is_encrypted(path)
    }

    /// Encrypts `path` into `<path>.enc` and removes the plaintext.
    ///
    /// The plaintext is removed only after the ciphertext has been fully written.
    /// An existing destination is never overwritten.
    pub fn encrypt(&self, path: &Path, password: &str) -> Result<PathBuf, VaultError> {
        let plaintext = fs::read(path).map_err(|e| VaultError::io(path, e))?;

        let mut salt = [0u8; SALT_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);

        let key = self.derive_key(password, &salt);
        let cipher = ChaCha20Poly1305::new((&key).into());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        sealed.extend_from_slice(MAGIC);
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        let destination = encrypted_path(path);
        write_new(&destination, &sealed)?;

        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(
                "[vault] encrypted {} but could not remove plaintext: {e}",
                path.display()
            );
        }

        let name = file_name(path);
        self.keys.lock().put(&name, key);
        tracing::debug!("[vault] encrypted {name}");

        Ok(destination)
    }

    /// Decrypts `<name>.enc` back to `<name>` and removes the ciphertext.
    ///
    /// A wrong password or tampered file fails with
    /// [`VaultError::AuthenticationFailure`] and leaves the ciphertext untouched.
    pub fn decrypt(&self, path: &Path, password: &str) -> Result<PathBuf, VaultError> {
        let sealed = self.read_sealed(path)?;
        let key = self.derive_key(password, sealed.salt());
        self.open_with_key(path, &sealed, &key)
    }

    /// Decrypts using the key recorded when the file was encrypted.
    pub fn decrypt_with_stored_key(&self, path: &Path) -> Result<PathBuf, VaultError> {
        let sealed = self.read_sealed(path)?;
        let name = file_name(&decrypted_path(path)?);
        let key = self
            .keys
            .lock()
            .get(&name)
            .ok_or(VaultError::MissingKey { name })?;
        self.open_with_key(path, &sealed, &key)
    }

    /// Reads persisted keys into the key store.
    pub fn load_keys(&self) -> Result<(), VaultError> {
        self.keys.lock().load()
    }

    /// Persists the key store.
    pub fn flush_keys(&self) -> Result<(), VaultError> {
        self.keys.lock().flush()
    }

    /// Returns true if a key is recorded for the original file name.
    pub fn has_key(&self, name: &str) -> bool {
        self.keys.lock().get(name).is_some()
    }

    fn read_sealed(&self, path: &Path) -> Result<Sealed, VaultError> {
        if !is_encrypted(path) {
            return Err(VaultError::NotEncrypted {
                path: path.to_path_buf(),
            });
        }

        let bytes = fs::read(path).map_err(|e| VaultError::io(path, e))?;
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(VaultError::InvalidFormat {
                path: path.to_path_buf(),
                reason: "missing vault header".to_string(),
            });
        }
        Ok(Sealed { bytes })
    }

    fn open_with_key(
        &self,
        path: &Path,
        sealed: &Sealed,
        key: &FileKey,
    ) -> Result<PathBuf, VaultError> {
        let cipher = ChaCha20Poly1305::new(key.into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(sealed.nonce()), sealed.ciphertext())
            .map_err(|_| VaultError::AuthenticationFailure {
                path: path.to_path_buf(),
            })?;

        let destination = decrypted_path(path)?;
        write_new(&destination, &plaintext)?;

        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(
                "[vault] decrypted {} but could not remove ciphertext: {e}",
                path.display()
            );
        }

        Ok(destination)
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> FileKey {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, self.iterations, &mut key);
        key
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

struct Sealed {
    bytes: Vec<u8>,
}

impl Sealed {
    fn salt(&self) -> &[u8] {
        &self.bytes[MAGIC.len()..MAGIC.len() + SALT_LEN]
    }

    fn nonce(&self) -> &[u8] {
        &self.bytes[MAGIC.len() + SALT_LEN..HEADER_LEN]
    }

    fn ciphertext(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }
}

/// `report.pdf` → `report.pdf.enc`
pub fn encrypted_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);
    PathBuf::from(name)
}

/// `report.pdf.enc` → `report.pdf`
pub fn decrypted_path(path: &Path) -> Result<PathBuf, VaultError> {
    if !is_encrypted(path) {
        return Err(VaultError::NotEncrypted {
            path: path.to_path_buf(),
        });
    }
    Ok(path.with_extension(""))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn write_new(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| VaultError::io(path, e))?;

    if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(VaultError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_vault() -> Vault {
        Vault::new().with_iterations(1_000)
    }

    #[test]
    fn test_is_encrypted_by_suffix_only() {
        assert!(is_encrypted(Path::new("/desk/report.pdf.enc")));
        assert!(is_encrypted(Path::new("plain.enc")));
        assert!(!is_encrypted(Path::new("report.pdf")));
        assert!(!is_encrypted(Path::new("enc")));
    }

    #[test]
    fn test_round_trip_restores_bytes() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let original = temp_dir.path().join("report.pdf");
        let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        fs::write(&original, &content).expect("Failed to write test file");

        let vault = test_vault();
        let encrypted = vault.encrypt(&original, "hunter2").expect("encrypt");

        assert_eq!(encrypted, temp_dir.path().join("report.pdf.enc"));
        assert!(!original.exists());
        assert!(vault.has_key("report.pdf"));
        assert_ne!(fs::read(&encrypted).unwrap(), content);

        let decrypted = vault.decrypt(&encrypted, "hunter2").expect("decrypt");
        assert_eq!(decrypted, original);
        assert_eq!(fs::read(&decrypted).unwrap(), content);
        assert!(!encrypted.exists());
    }

    #[test]
    fn test_wrong_password_leaves_ciphertext() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let original = temp_dir.path().join("notes.txt");
        fs::write(&original, "secret").expect("Failed to write test file");

        let vault = test_vault();
        let encrypted = vault.encrypt(&original, "right").unwrap();
        let before = fs::read(&encrypted).unwrap();

        let result = vault.decrypt(&encrypted, "wrong");
        assert!(matches!(result, Err(VaultError::AuthenticationFailure { .. })));
        assert_eq!(fs::read(&encrypted).unwrap(), before);
        assert!(!original.exists());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let original = temp_dir.path().join("notes.txt");
        fs::write(&original, "secret").unwrap();

        let vault = test_vault();
        let encrypted = vault.encrypt(&original, "pw").unwrap();
        let mut bytes = fs::read(&encrypted).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&encrypted, &bytes).unwrap();

        let result = vault.decrypt(&encrypted, "pw");
        assert!(matches!(result, Err(VaultError::AuthenticationFailure { .. })));
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = test_vault().encrypt(&temp_dir.path().join("gone.txt"), "pw");
        assert!(matches!(result, Err(VaultError::Io { .. })));
    }

    #[test]
    fn test_existing_destination_keeps_plaintext() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("a.txt");
        fs::write(&original, "plain").unwrap();
        fs::write(temp_dir.path().join("a.txt.enc"), "occupied").unwrap();

        let result = test_vault().encrypt(&original, "pw");
        assert!(matches!(result, Err(VaultError::Io { .. })));
        assert_eq!(fs::read_to_string(&original).unwrap(), "plain");
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("a.txt.enc")).unwrap(),
            "occupied"
        );
    }

    #[test]
    fn test_renamed_plain_file_is_not_a_vault_file() {
        let temp_dir = TempDir::new().unwrap();
        let fake = temp_dir.path().join("fake.enc");
        fs::write(&fake, "just text").unwrap();

        assert!(is_encrypted(&fake));
        let result = test_vault().decrypt(&fake, "pw");
        assert!(matches!(result, Err(VaultError::InvalidFormat { .. })));
    }

    #[test]
    fn test_stored_key_decrypts_after_reload() {
        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("keys").join("keys.json");
        let original = temp_dir.path().join("photo.jpg");
        fs::write(&original, b"\xff\xd8jpeg").unwrap();

        let vault =
            Vault::with_key_store(Box::new(FileKeyStore::new(&key_path))).with_iterations(1_000);
        let encrypted = vault.encrypt(&original, "pw").unwrap();
        vault.flush_keys().unwrap();

        let fresh =
            Vault::with_key_store(Box::new(FileKeyStore::new(&key_path))).with_iterations(1_000);
        assert!(matches!(
            fresh.decrypt_with_stored_key(&encrypted),
            Err(VaultError::MissingKey { .. })
        ));
        fresh.load_keys().unwrap();
        let decrypted = fresh.decrypt_with_stored_key(&encrypted).unwrap();
        assert_eq!(fs::read(decrypted).unwrap(), b"\xff\xd8jpeg");
    }

    #[test]
    fn test_memory_key_store_is_not_persistent() {
        let mut store = MemoryKeyStore::default();
        store.put("a.txt", [7u8; 32]);
        assert_eq!(store.get("a.txt"), Some([7u8; 32]));
        store.flush().unwrap();

        let mut reloaded = MemoryKeyStore::default();
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("a.txt"), None);
    }
}
