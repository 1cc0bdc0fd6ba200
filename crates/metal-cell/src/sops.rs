//! SOPS-style envelope encryption for YAML documents.
//!
//! Every scalar leaf is encrypted under a single AES-256-GCM data key; the
//! data key itself is encrypted to the team's age recipient and carried in
//! the `sops` metadata section. Keys ending in the unencrypted suffix keep
//! their cleartext value. The leaf's path acts as additional authenticated
//! data, so values cannot be swapped between keys without detection.

use std::io::{Read, Write};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::RngCore;
use serde_yaml::Value;

use crate::error::{CellError, CellResult};

/// Keys with this suffix are left in cleartext.
pub const UNENCRYPTED_SUFFIX: &str = "_unencrypted";

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;
const NONCE_LEN: usize = 12;

/// Encrypt a YAML document into a SOPS envelope for one age recipient.
pub fn encrypt_yaml(plaintext_yaml: &str, recipient: &str) -> CellResult<String> {
    let mut doc: Value =
        serde_yaml::from_str(plaintext_yaml).map_err(|e| CellError::crypto(e.to_string()))?;

    let mut data_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut data_key);

    encrypt_value(&mut doc, &data_key, "")?;

    let recipient: age::x25519::Recipient = recipient
        .parse()
        .map_err(|e| CellError::crypto(format!("invalid age recipient: {e}")))?;
    let enc_data_key = age_encrypt(&data_key, &recipient)?;

    let mut root = match doc {
        Value::Mapping(mapping) => mapping,
        _ => return Err(CellError::crypto("top-level YAML must be a mapping")),
    };

    let metadata = serde_yaml::from_str::<Value>(&format!(
        "age:\n  - recipient: {}\n    enc: {}\nlastmodified: '{}'\nunencrypted_suffix: {}\nversion: 3.8.1\n",
        recipient,
        B64.encode(&enc_data_key),
        chrono::Utc::now().to_rfc3339(),
        UNENCRYPTED_SUFFIX,
    ))
    .map_err(|e| CellError::crypto(e.to_string()))?;
    root.insert(Value::String("sops".to_owned()), metadata);

    serde_yaml::to_string(&Value::Mapping(root)).map_err(|e| CellError::crypto(e.to_string()))
}

/// Decrypt a SOPS envelope back into the original YAML document.
pub fn decrypt_yaml(envelope_yaml: &str, identity: &str) -> CellResult<String> {
    let doc: Value =
        serde_yaml::from_str(envelope_yaml).map_err(|e| CellError::crypto(e.to_string()))?;
    let mut root = match doc {
        Value::Mapping(mapping) => mapping,
        _ => return Err(CellError::crypto("top-level YAML must be a mapping")),
    };

    let metadata = root
        .remove(&Value::String("sops".to_owned()))
        .ok_or_else(|| CellError::crypto("missing sops metadata"))?;
    let enc_data_key = metadata
        .get("age")
        .and_then(|age| age.get(0))
        .and_then(|entry| entry.get("enc"))
        .and_then(Value::as_str)
        .ok_or_else(|| CellError::crypto("missing age data key"))?;

    let identity: age::x25519::Identity = identity
        .parse()
        .map_err(|e| CellError::crypto(format!("invalid age identity: {e}")))?;
    let wrapped = B64
        .decode(enc_data_key)
        .map_err(|e| CellError::crypto(format!("data key not base64: {e}")))?;
    let data_key = age_decrypt(&wrapped, &identity)?;
    if data_key.len() != 32 {
        return Err(CellError::crypto("data key has wrong length"));
    }

    let mut doc = Value::Mapping(root);
    decrypt_value(&mut doc, &data_key, "")?;
    serde_yaml::to_string(&doc).map_err(|e| CellError::crypto(e.to_string()))
}

fn encrypt_value(value: &mut Value, data_key: &[u8], path: &str) -> CellResult<()> {
    match value {
        Value::Mapping(mapping) => {
            for (key, child) in mapping.iter_mut() {
                let key_str = key.as_str().unwrap_or_default();
                if key_str.ends_with(UNENCRYPTED_SUFFIX) {
                    continue;
                }
                let child_path = format!("{path}{key_str}:");
                encrypt_value(child, data_key, &child_path)?;
            }
            Ok(())
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                let child_path = format!("{path}{i}:");
                encrypt_value(item, data_key, &child_path)?;
            }
            Ok(())
        }
        Value::Null => Ok(()),
        scalar => {
            let (plaintext, type_tag) = scalar_plaintext(scalar);
            *scalar = Value::String(encrypt_leaf(&plaintext, &type_tag, data_key, path)?);
            Ok(())
        }
    }
}

fn decrypt_value(value: &mut Value, data_key: &[u8], path: &str) -> CellResult<()> {
    match value {
        Value::Mapping(mapping) => {
            for (key, child) in mapping.iter_mut() {
                let key_str = key.as_str().unwrap_or_default();
                if key_str.ends_with(UNENCRYPTED_SUFFIX) {
                    continue;
                }
                let child_path = format!("{path}{key_str}:");
                decrypt_value(child, data_key, &child_path)?;
            }
            Ok(())
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                let child_path = format!("{path}{i}:");
                decrypt_value(item, data_key, &child_path)?;
            }
            Ok(())
        }
        Value::Null => Ok(()),
        scalar => {
            let ciphertext = scalar
                .as_str()
                .ok_or_else(|| CellError::crypto(format!("leaf at {path} is not encrypted")))?
                .to_owned();
            *scalar = decrypt_leaf(&ciphertext, data_key, path)?;
            Ok(())
        }
    }
}

fn scalar_plaintext(value: &Value) -> (String, String) {
    match value {
        Value::Bool(b) => (b.to_string(), "bool".to_owned()),
        Value::Number(n) => {
            let tag = if n.is_f64() { "float" } else { "int" };
            (n.to_string(), tag.to_owned())
        }
        Value::String(s) => (s.clone(), "str".to_owned()),
        _ => (String::new(), "str".to_owned()),
    }
}

fn encrypt_leaf(
    plaintext: &str,
    type_tag: &str,
    data_key: &[u8],
    path: &str,
) -> CellResult<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(data_key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut sealed = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: path.as_bytes(),
            },
        )
        .map_err(|e| CellError::crypto(format!("leaf encryption failed: {e}")))?;
    let tag = sealed.split_off(sealed.len().saturating_sub(16));

    Ok(format!(
        "ENC[AES256_GCM,data:{},iv:{},tag:{},type:{}]",
        B64.encode(&sealed),
        B64.encode(nonce_bytes),
        B64.encode(&tag),
        type_tag,
    ))
}

fn decrypt_leaf(ciphertext: &str, data_key: &[u8], path: &str) -> CellResult<Value> {
    let inner = ciphertext
        .strip_prefix("ENC[AES256_GCM,")
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| CellError::crypto(format!("leaf at {path} is not an ENC value")))?;

    let mut data = None;
    let mut iv = None;
    let mut tag = None;
    let mut type_tag = "str";
    for part in inner.split(',') {
        if let Some(v) = part.strip_prefix("data:") {
            data = Some(v);
        } else if let Some(v) = part.strip_prefix("iv:") {
            iv = Some(v);
        } else if let Some(v) = part.strip_prefix("tag:") {
            tag = Some(v);
        } else if let Some(v) = part.strip_prefix("type:") {
            type_tag = v;
        }
    }
    let (data, iv, tag) = match (data, iv, tag) {
        (Some(d), Some(i), Some(t)) => (d, i, t),
        _ => return Err(CellError::crypto(format!("malformed ENC value at {path}"))),
    };

    let mut sealed = B64
        .decode(data)
        .map_err(|e| CellError::crypto(format!("bad data b64: {e}")))?;
    sealed.extend(
        B64.decode(tag)
            .map_err(|e| CellError::crypto(format!("bad tag b64: {e}")))?,
    );
    let nonce_bytes = B64
        .decode(iv)
        .map_err(|e| CellError::crypto(format!("bad iv b64: {e}")))?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(data_key));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &sealed,
                aad: path.as_bytes(),
            },
        )
        .map_err(|e| CellError::crypto(format!("leaf decryption failed at {path}: {e}")))?;
    let plaintext = String::from_utf8(plaintext)
        .map_err(|e| CellError::crypto(format!("leaf not utf-8: {e}")))?;

    Ok(match type_tag {
        "bool" => Value::Bool(plaintext == "true"),
        "int" => plaintext
            .parse::<i64>()
            .map(Into::into)
            .unwrap_or(Value::String(plaintext)),
        "float" => plaintext
            .parse::<f64>()
            .map(Into::into)
            .unwrap_or(Value::String(plaintext)),
        _ => Value::String(plaintext),
    })
}

fn age_encrypt(plaintext: &[u8], recipient: &age::x25519::Recipient) -> CellResult<Vec<u8>> {
    let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient.clone())])
        .ok_or_else(|| CellError::crypto("no age recipients"))?;
    let mut out = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut out)
        .map_err(|e| CellError::crypto(e.to_string()))?;
    writer
        .write_all(plaintext)
        .map_err(|e| CellError::crypto(e.to_string()))?;
    writer
        .finish()
        .map_err(|e| CellError::crypto(e.to_string()))?;
    Ok(out)
}

fn age_decrypt(ciphertext: &[u8], identity: &age::x25519::Identity) -> CellResult<Vec<u8>> {
    let age::Decryptor::Recipients(decryptor) =
        age::Decryptor::new(ciphertext).map_err(|e| CellError::crypto(e.to_string()))?
    else {
        return Err(CellError::crypto("unexpected age decryptor type"));
    };
    let mut out = Vec::new();
    let identity: &dyn age::Identity = identity;
    let mut reader = decryptor
        .decrypt(std::iter::once(identity))
        .map_err(|e| CellError::crypto(e.to_string()))?;
    reader
        .read_to_end(&mut out)
        .map_err(|e| CellError::crypto(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn keypair() -> (String, String) {
        let identity = age::x25519::Identity::generate();
        (
            identity.to_public().to_string(),
            identity.to_string().expose_secret().clone(),
        )
    }

    const SAMPLE: &str = "\
cluster_name_unencrypted: cell-1
bootstrap_token: abc123.0123456789abcdef
machine_ca:
  crt: Zm9vY2VydA==
  key: Zm9va2V5
node_count: 1
";

    #[test]
    fn round_trip_restores_document() {
        let (public, private) = keypair();
        let envelope = encrypt_yaml(SAMPLE, &public).expect("encrypt");
        let decrypted = decrypt_yaml(&envelope, &private).expect("decrypt");

        let original: Value = serde_yaml::from_str(SAMPLE).expect("parse");
        let restored: Value = serde_yaml::from_str(&decrypted).expect("parse");
        assert_eq!(original, restored);
    }

    #[test]
    fn unencrypted_suffix_stays_cleartext() {
        let (public, _) = keypair();
        let envelope = encrypt_yaml(SAMPLE, &public).expect("encrypt");
        assert!(envelope.contains("cluster_name_unencrypted: cell-1"));
        assert!(!envelope.contains("abc123.0123456789abcdef"));
        assert!(envelope.contains("ENC[AES256_GCM,data:"));
    }

    #[test]
    fn envelope_carries_sops_metadata() {
        let (public, _) = keypair();
        let envelope = encrypt_yaml(SAMPLE, &public).expect("encrypt");
        let doc: Value = serde_yaml::from_str(&envelope).expect("parse");
        let sops = doc.get("sops").expect("sops section");
        assert_eq!(
            sops.get("unencrypted_suffix").and_then(Value::as_str),
            Some(UNENCRYPTED_SUFFIX)
        );
        assert_eq!(
            sops.get("age")
                .and_then(|a| a.get(0))
                .and_then(|e| e.get("recipient"))
                .and_then(Value::as_str),
            Some(public.as_str())
        );
    }

    #[test]
    fn wrong_identity_fails() {
        let (public, _) = keypair();
        let (_, other_private) = keypair();
        let envelope = encrypt_yaml(SAMPLE, &public).expect("encrypt");
        assert!(decrypt_yaml(&envelope, &other_private).is_err());
    }

    #[test]
    fn swapped_leaves_are_detected() {
        let (public, private) = keypair();
        let envelope = encrypt_yaml(SAMPLE, &public).expect("encrypt");

        // Swap the crt and key ciphertexts; AAD binding must reject this.
        let mut doc: Value = serde_yaml::from_str(&envelope).expect("parse");
        let ca = doc
            .get_mut("machine_ca")
            .and_then(Value::as_mapping_mut)
            .expect("machine_ca");
        let crt = ca
            .get(&Value::String("crt".to_owned()))
            .cloned()
            .expect("crt");
        let key = ca
            .get(&Value::String("key".to_owned()))
            .cloned()
            .expect("key");
        ca.insert(Value::String("crt".to_owned()), key);
        ca.insert(Value::String("key".to_owned()), crt);
        let tampered = serde_yaml::to_string(&doc).expect("serialize");

        assert!(decrypt_yaml(&tampered, &private).is_err());
    }
}
