use tracing::instrument;

use crate::{
    common::{KeyBytes, SECTOR_SIZE},
    part::HASHES_SIZE,
    util::array_ref,
};

/// Encrypts data in-place using AES-128-CBC with the given key and IV.
pub fn aes_cbc_encrypt(key: &KeyBytes, iv: &KeyBytes, data: &mut [u8]) {
    use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
    assert_eq!(data.len() % 16, 0);
    <cbc::Encryptor<aes::Aes128>>::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(data, data.len())
        .unwrap();
}

/// Encrypts a Wii partition sector in-place. The hash block is encrypted with
/// a zero IV, the data with an IV taken from the encrypted hash block.
#[instrument(skip_all)]
pub fn encrypt_sector(out: &mut [u8; SECTOR_SIZE], key: &KeyBytes) {
    aes_cbc_encrypt(key, &[0u8; 16], &mut out[..HASHES_SIZE]);
    // Data IV from encrypted hash block
    let iv = *array_ref![out, 0x3D0, 16];
    aes_cbc_encrypt(key, &iv, &mut out[HASHES_SIZE..]);
}
