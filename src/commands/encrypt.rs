use super::Session;
use crate::crypto;
use crate::error::Result;
use std::fs;
use std::path::Path;

/// Encrypt a file with the current project key and print the ciphertext
pub fn encrypt(session: &Session, file: &Path) -> Result<()> {
    let plaintext = fs::read_to_string(file)?;
    let key = session.keys.current(session.org()?, session.project()?)?;
    println!("{}", crypto::encrypt(&plaintext, &key)?);
    Ok(())
}

/// Decrypt ciphertext produced by `encrypt` and print the plaintext
pub fn decrypt(session: &Session, ciphertext: &str) -> Result<()> {
    let key = session.keys.current(session.org()?, session.project()?)?;
    let plaintext = crypto::decrypt(ciphertext.trim(), &key)?;
    print!("{}", String::from_utf8_lossy(&plaintext));
    Ok(())
}
