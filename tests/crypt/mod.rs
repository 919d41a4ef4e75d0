// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::Result;
use ecl::*;

struct Xor;

impl Encrypter for Xor {
    fn encrypt(&self, _ctx: &Context, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.iter().map(|b| b ^ 0x80).collect())
    }
}

impl Decrypter for Xor {
    fn decrypt(&self, _ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.iter().map(|b| b ^ 0x80).collect())
    }
}

const SOURCE: &str = r#"
values:
  db:
    user: admin
    password:
      fn::secret: hunter2
  tokens:
    - fn::secret: abc123
    - plain
"#;

#[test]
fn envelopes() -> Result<()> {
    let text = encode_ciphertext(b"\xe8\xf5\xee\xf4\xe5\xf2\xb2");
    assert_eq!(text, "ZXNjeAAAAAHo9e705fKyKo30VQ==");
    assert_eq!(decode_ciphertext(&text)?, b"\xe8\xf5\xee\xf4\xe5\xf2\xb2");
    assert_eq!(decode_ciphertext("AAAA"), Err(EnvelopeError::Eof));
    Ok(())
}

#[test]
fn secrets_round_trip() -> Result<()> {
    let ctx = Context::new();

    let encrypted = encrypt_secrets(&ctx, "test", SOURCE, &Xor)?;
    assert!(!encrypted.contains("hunter2"), "{encrypted}");
    assert!(!encrypted.contains("abc123"), "{encrypted}");
    assert!(encrypted.contains("ZXNjeAAAAAHo9e705fKyKo30VQ=="), "{encrypted}");
    assert!(encrypted.contains("admin"));
    assert!(encrypted.contains("plain"));

    // Ciphertexts are left alone.
    assert_eq!(encrypt_secrets(&ctx, "test", &encrypted, &Xor)?, encrypted);

    let decrypted = decrypt_secrets(&ctx, "test", &encrypted, &Xor)?;
    let expected: serde_yaml::Value = serde_yaml::from_str(SOURCE)?;
    let actual: serde_yaml::Value = serde_yaml::from_str(&decrypted)?;
    assert_eq!(actual, expected);
    Ok(())
}

#[test]
fn decrypting_invalid_envelopes() -> Result<()> {
    let ctx = Context::new();
    let source = "values:\n  a:\n    fn::secret:\n      ciphertext: AAAA\n";
    let err = decrypt_secrets(&ctx, "test", source, &Xor).unwrap_err();
    assert_eq!(err.to_string(), "invalid ciphertext: EOF");

    let err = encrypt_secrets(&ctx, "test", "values: [", &Xor).unwrap_err();
    assert!(err.to_string().starts_with("error"), "{err}");
    Ok(())
}

#[test]
fn cancellation() -> Result<()> {
    let ctx = Context::new();
    ctx.cancel();
    let err = encrypt_secrets(&ctx, "test", SOURCE, &Xor).unwrap_err();
    assert_eq!(err.to_string(), "context canceled");

    // Documents without secrets never consult the context.
    let source = "values:\n  a: 1\n";
    let unchanged = encrypt_secrets(&ctx, "test", source, &Xor)?;
    let expected: serde_yaml::Value = serde_yaml::from_str(source)?;
    assert_eq!(serde_yaml::from_str::<serde_yaml::Value>(&unchanged)?, expected);
    Ok(())
}
