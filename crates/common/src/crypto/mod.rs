//! Field-level encryption for the two secret columns in the connection
//! repository (`odoo_api_key`, `webhook_secret`). The database itself is a
//! plain WAL-mode file; only these columns are ciphertext.

mod field_cipher;

pub use field_cipher::{CipherError, FieldCipher};
