//! Chunking and per-chunk sanitization (§4.7 step 4-5).

/// Split `text` into overlapping windows of `chunk` chars, stride
/// `chunk - overlap`, trimming and dropping empties. Safety rule: if
/// `chunk <= overlap`, the whole input becomes a single chunk so the loop
/// can never stall (§4.7 step 4, §8 invariant 6).
pub fn chunk_text(text: &str, chunk: usize, overlap: usize) -> Vec<String> {
    if chunk == 0 || chunk <= overlap {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let stride = chunk - overlap;
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    out
}

/// Strip characters outside the allowed printable/punctuation set before a
/// chunk is sent to the embedding provider (§4.7 step 5).
pub fn sanitize_chunk(text: &str) -> String {
    text.chars().filter(|c| is_allowed_char(*c)).collect()
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || " \t\n\r.,;:!?@#$%^&*()_+-=[]{}|'\"<>/`~".contains(c)
}
