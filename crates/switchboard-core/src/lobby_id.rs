//! Lobby identifier generation

/// Characters used in lobby ids (mixed-case alphanumeric, 62 symbols)
pub const LOBBY_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are discarded so every symbol is equally likely.
const UNBIASED_LIMIT: u8 = (256 / LOBBY_ID_ALPHABET.len() * LOBBY_ID_ALPHABET.len()) as u8;

/// Generate a random lobby id of `len` characters
///
/// Collisions with active lobbies are the caller's concern.
pub fn generate_lobby_id(len: usize) -> Result<String, getrandom::Error> {
    let mut id = String::with_capacity(len);
    let mut bytes = [0u8; 16];

    while id.len() < len {
        getrandom::fill(&mut bytes)?;
        for b in bytes {
            if id.len() == len {
                break;
            }
            if b < UNBIASED_LIMIT {
                id.push(LOBBY_ID_ALPHABET[(b as usize) % LOBBY_ID_ALPHABET.len()] as char);
            }
        }
    }

    Ok(id)
}

/// Check that `id` has the given length and only uses the lobby alphabet
pub fn is_lobby_id(id: &str, len: usize) -> bool {
    id.len() == len && id.bytes().all(|b| LOBBY_ID_ALPHABET.contains(&b))
}
