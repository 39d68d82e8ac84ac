//! Streaming AES-256-CBC
//!
//! Collection content is encrypted with AES-256 in CBC mode and PKCS#7
//! (PKCS#5) padding. Every encryption draws a fresh random IV, which travels
//! in front of the ciphertext:
//!
//! ```text
//! [ iv: 16 bytes ][ ciphertext: n * 16 bytes ]
//! ```
//!
//! [`EncryptingReader`] and [`DecryptingReader`] transform a `Read` block by
//! block, so a collection file never has to be held in memory in full.

use std::io::{self, Read};

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::secret::Secret;

/// Size of the CBC initialisation vector in bytes
pub const IV_SIZE: usize = 16;
/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;
/// How much plaintext or ciphertext is pulled from the inner reader at once
const CHUNK_SIZE: usize = 4096;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("cipher error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn random_iv() -> Result<[u8; IV_SIZE], CipherError> {
    let mut iv = [0u8; IV_SIZE];
    getrandom::getrandom(&mut iv).map_err(|e| anyhow::anyhow!("failed to generate iv: {}", e))?;
    Ok(iv)
}

fn encryptor(key: &Secret, iv: &[u8]) -> Result<Aes256CbcEnc, CipherError> {
    Aes256CbcEnc::new_from_slices(key.bytes(), iv)
        .map_err(|_| anyhow::anyhow!("invalid key or iv length").into())
}

fn decryptor(key: &Secret, iv: &[u8]) -> Result<Aes256CbcDec, CipherError> {
    Aes256CbcDec::new_from_slices(key.bytes(), iv)
        .map_err(|_| anyhow::anyhow!("invalid key or iv length").into())
}

/// Encrypt a buffer under `key` with an explicit IV. Returns the ciphertext
/// without the IV prefix.
pub fn encrypt_with_iv(key: &Secret, iv: &[u8; IV_SIZE], data: &[u8]) -> Result<Vec<u8>, CipherError> {
    Ok(encryptor(key, iv)?.encrypt_padded_vec_mut::<Pkcs7>(data))
}

/// Reverse of [`encrypt_with_iv`].
pub fn decrypt_with_iv(
    key: &Secret,
    iv: &[u8; IV_SIZE],
    data: &[u8],
) -> Result<Vec<u8>, CipherError> {
    decryptor(key, iv)?
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| anyhow::anyhow!("bad padding - wrong key or corrupted data").into())
}

/// Generate a random IV for use with [`encrypt_with_iv`].
pub fn generate_iv() -> Result<[u8; IV_SIZE], CipherError> {
    random_iv()
}

/// Read into `buf` until it is full or the reader is exhausted.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Output buffer shared by both readers
#[derive(Debug, Default)]
struct Staged {
    out: Vec<u8>,
    pos: usize,
}

impl Staged {
    fn drained(&self) -> bool {
        self.pos == self.out.len()
    }

    fn replace(&mut self, out: Vec<u8>) {
        self.out = out;
        self.pos = 0;
    }

    fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.out.len() - self.pos);
        dst[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Wraps a plaintext reader and yields `iv || ciphertext`.
pub struct EncryptingReader<R> {
    inner: R,
    cipher: Option<Aes256CbcEnc>,
    pending: Vec<u8>,
    staged: Staged,
}

impl<R: Read> EncryptingReader<R> {
    /// Start encrypting `inner` under `key` with a fresh random IV.
    pub fn new(inner: R, key: &Secret) -> Result<Self, CipherError> {
        let iv = random_iv()?;
        let cipher = encryptor(key, &iv)?;
        let mut staged = Staged::default();
        staged.replace(iv.to_vec());
        Ok(Self {
            inner,
            cipher: Some(cipher),
            pending: Vec::with_capacity(CHUNK_SIZE + BLOCK_SIZE),
            staged,
        })
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let read = read_chunk(&mut self.inner, &mut chunk)?;
        self.pending.extend_from_slice(&chunk[..read]);

        if read == 0 {
            // end of input: pad whatever is left
            if let Some(cipher) = self.cipher.take() {
                let tail = std::mem::take(&mut self.pending);
                self.staged
                    .replace(cipher.encrypt_padded_vec_mut::<Pkcs7>(&tail));
            }
            return Ok(());
        }

        let whole = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        if whole == 0 {
            return Ok(());
        }
        let mut blocks: Vec<u8> = self.pending.drain(..whole).collect();
        if let Some(cipher) = self.cipher.as_mut() {
            for block in blocks.chunks_exact_mut(BLOCK_SIZE) {
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        }
        self.staged.replace(blocks);
        Ok(())
    }
}

impl<R: Read> Read for EncryptingReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        while self.staged.drained() {
            if self.cipher.is_none() {
                return Ok(0);
            }
            self.fill()?;
        }
        Ok(self.staged.copy_to(dst))
    }
}

/// Wraps an `iv || ciphertext` reader and yields the plaintext.
///
/// The final block is held back until the inner reader is exhausted so the
/// padding can be checked and stripped.
pub struct DecryptingReader<R> {
    inner: R,
    cipher: Option<Aes256CbcDec>,
    pending: Vec<u8>,
    staged: Staged,
}

impl<R: Read> DecryptingReader<R> {
    /// Read the IV from `inner` and prepare to decrypt the rest under `key`.
    pub fn new(mut inner: R, key: &Secret) -> Result<Self, CipherError> {
        let mut iv = [0u8; IV_SIZE];
        if read_chunk(&mut inner, &mut iv)? != IV_SIZE {
            return Err(anyhow::anyhow!("ciphertext too short for iv").into());
        }
        let cipher = decryptor(key, &iv)?;
        Ok(Self {
            inner,
            cipher: Some(cipher),
            pending: Vec::with_capacity(CHUNK_SIZE + BLOCK_SIZE),
            staged: Staged::default(),
        })
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let read = read_chunk(&mut self.inner, &mut chunk)?;
        self.pending.extend_from_slice(&chunk[..read]);

        if read == 0 {
            if let Some(cipher) = self.cipher.take() {
                if self.pending.len() != BLOCK_SIZE {
                    return Err(invalid_data("ciphertext is not a whole number of blocks"));
                }
                let mut tail = std::mem::take(&mut self.pending);
                let plain = cipher
                    .decrypt_padded_mut::<Pkcs7>(&mut tail)
                    .map_err(|_| invalid_data("bad padding - wrong key or corrupted data"))?;
                self.staged.replace(plain.to_vec());
            }
            return Ok(());
        }

        if self.pending.len() <= BLOCK_SIZE {
            return Ok(());
        }
        // keep at least one block back for unpadding
        let whole = (self.pending.len() - 1) / BLOCK_SIZE * BLOCK_SIZE;
        let mut blocks: Vec<u8> = self.pending.drain(..whole).collect();
        if let Some(cipher) = self.cipher.as_mut() {
            for block in blocks.chunks_exact_mut(BLOCK_SIZE) {
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        }
        self.staged.replace(blocks);
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        while self.staged.drained() {
            if self.cipher.is_none() {
                return Ok(0);
            }
            self.fill()?;
        }
        Ok(self.staged.copy_to(dst))
    }
}
