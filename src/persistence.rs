// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// On-disk state: a `{nickname: base32_address}` JSON map ("contacts") and a
// local destination file. The contacts file is written via write-and-rename
// for atomicity.
//
// The `Gateway` trait has no operation to re-derive a base32 identity from a
// raw private key, so the destination file stores the base32 identity on its
// first line followed by the raw key bytes, rather than the key alone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::gateway::Gateway;

const CONTACTS_FILENAME: &str = "contacts.json";
const DESTINATION_FILENAME: &str = "murmur.dat";

pub async fn ensure_data_dir(datadir: &str) -> Result<()> {
    fs::create_dir_all(datadir).await?;
    Ok(())
}

/// Load `{nickname: base32_address}`. A missing file is not an error - it
/// is treated the same as an empty map.
pub async fn load_contacts(datadir: &str) -> Result<HashMap<String, String>> {
    let path = Path::new(datadir).join(CONTACTS_FILENAME);

    match fs::read(&path).await {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Persist `{nickname: base32_address}` via write-and-rename.
pub async fn save_contacts(datadir: &str, contacts: &HashMap<String, String>) -> Result<()> {
    let path = Path::new(datadir).join(CONTACTS_FILENAME);
    let tmp_path = tmp_path_for(&path);

    let data = serde_json::to_vec(contacts)?;

    {
        let mut f = fs::File::create(&tmp_path).await?;
        f.write_all(&data).await?;
        f.sync_all().await?;
    }

    fs::rename(&tmp_path, &path).await?;

    Ok(())
}

/// Load the local destination from disk, or mint and persist a fresh one.
/// Returns `(base32_identity, private_key_bytes)`.
pub async fn load_or_create_destination(
    datadir: &str,
    gateway: &dyn Gateway,
) -> Result<(String, Vec<u8>)> {
    let path = Path::new(datadir).join(DESTINATION_FILENAME);

    match fs::read(&path).await {
        Ok(raw) => Ok(split_destination_file(&raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let (base32, key) = gateway.new_destination().await?;

            let mut contents = base32.clone().into_bytes();
            contents.push(b'\n');
            contents.extend_from_slice(&key);

            fs::write(&path, &contents).await?;

            Ok((base32, key))
        }
        Err(e) => Err(e.into()),
    }
}

fn split_destination_file(raw: &[u8]) -> (String, Vec<u8>) {
    match raw.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            let base32 = String::from_utf8_lossy(&raw[..idx]).to_string();
            (base32, raw[idx + 1..].to_vec())
        }
        None => (String::new(), raw.to_vec()),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{MockGateway, MockNetwork};

    #[tokio::test]
    async fn missing_contacts_file_is_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let contacts = load_contacts(dir.path().to_str().unwrap()).await.unwrap();
        assert!(contacts.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let datadir = dir.path().to_str().unwrap();

        let mut contacts = HashMap::new();
        contacts.insert("alice".to_string(), "a".repeat(52));

        save_contacts(datadir, &contacts).await.unwrap();
        let loaded = load_contacts(datadir).await.unwrap();

        assert_eq!(loaded, contacts);
    }

    #[tokio::test]
    async fn save_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let datadir = dir.path().to_str().unwrap();

        save_contacts(datadir, &HashMap::new()).await.unwrap();

        let tmp = Path::new(datadir).join(format!("{}.tmp", CONTACTS_FILENAME));
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn load_or_create_destination_persists_a_stable_identity() {
        let dir = tempfile::tempdir().unwrap();
        let datadir = dir.path().to_str().unwrap();
        let gateway = MockGateway::new(MockNetwork::new());

        let (base32_a, key_a) = load_or_create_destination(datadir, &gateway)
            .await
            .unwrap();
        assert_eq!(key_a, vec![0u8; 32]);
        assert!(!base32_a.is_empty());

        let (base32_b, key_b) = load_or_create_destination(datadir, &gateway)
            .await
            .unwrap();

        assert_eq!(key_a, key_b);
        assert_eq!(base32_a, base32_b);
    }
}
