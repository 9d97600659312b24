//! Turns purchased pins into delivery-ready text files and captions.

use crate::orders::{OrderId, PinRecord};

/// Telegram's hard limit for a single text message.
pub const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `Code:` / `Serial:` pairs separated by blank lines.
    WithSerial,
    /// One bare code per line, for bulk redemption tools.
    CodesOnly,
}

impl ArtifactKind {
    fn slug(self) -> &'static str {
        match self {
            ArtifactKind::WithSerial => "codes_with_serials",
            ArtifactKind::CodesOnly => "codes",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ArtifactKind::WithSerial => "codes with serial numbers",
            ArtifactKind::CodesOnly => "codes only",
        }
    }
}

/// A rendered file ready for attachment delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub caption: String,
    pub content: String,
    /// Number of pins rendered into `content`.
    pub entries: usize,
}

#[must_use]
pub fn file_name(order_id: OrderId, kind: ArtifactKind, partial: bool) -> String {
    let scope = if partial { "_partial" } else { "" };
    format!("order_{order_id}{scope}_{}.txt", kind.slug())
}

#[must_use]
pub fn caption(order_id: OrderId, kind: ArtifactKind, partial: bool) -> String {
    if partial {
        format!("🧾 Order #{order_id} (partial) · {}", kind.label())
    } else {
        format!("🧾 Order #{order_id} · {}", kind.label())
    }
}

/// Render both artifact variants from the non-failed entries of `pins`.
///
/// Returns an empty vector when no pin is valid: there is nothing to deliver.
#[must_use]
pub fn format_artifacts(order_id: OrderId, pins: &[PinRecord], partial: bool) -> Vec<Artifact> {
    let valid: Vec<&PinRecord> = pins.iter().filter(|p| !p.is_failed()).collect();
    if valid.is_empty() {
        return Vec::new();
    }

    let with_serial = valid
        .iter()
        .map(|p| {
            format!(
                "Code: {}\nSerial: {}",
                p.code,
                p.serial_number.as_deref().unwrap_or("N/A")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let codes_only = valid
        .iter()
        .map(|p| p.code.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    [
        (ArtifactKind::WithSerial, with_serial),
        (ArtifactKind::CodesOnly, codes_only),
    ]
    .into_iter()
    .map(|(kind, body)| Artifact {
        kind,
        file_name: file_name(order_id, kind, partial),
        caption: caption(order_id, kind, partial),
        content: format!("{body}\n"),
        entries: valid.len(),
    })
    .collect()
}

/// Split an artifact into plain messages no longer than `max_len` characters.
///
/// The caption heads the first message. Lines are never split unless a single
/// line is itself longer than `max_len`.
#[must_use]
pub fn plain_text_chunks(artifact: &Artifact, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut current = artifact.caption.clone();

    for line in artifact.content.lines() {
        let needed = if current.is_empty() {
            line.chars().count()
        } else {
            current.chars().count() + 1 + line.chars().count()
        };

        if needed > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if line.chars().count() > max_len {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_len) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pins() -> Vec<PinRecord> {
        vec![
            PinRecord::redeemed("AAAA-1111", Some("SN-1".to_string())),
            PinRecord::failed(None, "declined"),
            PinRecord::redeemed("BBBB-2222", None),
        ]
    }

    #[test]
    fn filename_and_caption_are_deterministic() {
        let a = (
            file_name(42, ArtifactKind::WithSerial, false),
            caption(42, ArtifactKind::WithSerial, false),
        );
        let b = (
            file_name(42, ArtifactKind::WithSerial, false),
            caption(42, ArtifactKind::WithSerial, false),
        );
        assert_eq!(a, b);
        assert_eq!(a.0, "order_42_codes_with_serials.txt");
    }

    #[test]
    fn partial_flag_changes_name_and_caption() {
        assert_eq!(
            file_name(42, ArtifactKind::CodesOnly, true),
            "order_42_partial_codes.txt"
        );
        assert!(caption(42, ArtifactKind::CodesOnly, true).contains("(partial)"));
        assert!(!caption(42, ArtifactKind::CodesOnly, false).contains("(partial)"));
    }

    #[test]
    fn renders_both_variants_without_failed_pins() {
        let artifacts = format_artifacts(7, &pins(), false);
        assert_eq!(artifacts.len(), 2);

        let with_serial = &artifacts[0];
        assert_eq!(with_serial.kind, ArtifactKind::WithSerial);
        assert_eq!(
            with_serial.content,
            "Code: AAAA-1111\nSerial: SN-1\n\nCode: BBBB-2222\nSerial: N/A\n"
        );
        assert_eq!(with_serial.entries, 2);

        let codes = &artifacts[1];
        assert_eq!(codes.kind, ArtifactKind::CodesOnly);
        assert_eq!(codes.content, "AAAA-1111\nBBBB-2222\n");
        assert!(!codes.content.contains("FAILED"));
    }

    #[test]
    fn nothing_valid_renders_nothing() {
        let failed = vec![PinRecord::failed(None, "x"), PinRecord::failed(None, "y")];
        assert!(format_artifacts(1, &failed, true).is_empty());
    }

    #[test]
    fn chunks_respect_limit_and_lead_with_caption() {
        let artifacts = format_artifacts(9, &pins(), false);
        let chunks = plain_text_chunks(&artifacts[1], 24);
        assert!(chunks.iter().all(|c| c.chars().count() <= 24), "{chunks:?}");
        assert!(chunks[0].starts_with("🧾 Order #9"));
        let joined = chunks.join("\n");
        assert!(joined.contains("AAAA-1111"));
        assert!(joined.contains("BBBB-2222"));
    }

    #[test]
    fn single_message_when_everything_fits() {
        let artifacts = format_artifacts(9, &pins(), false);
        let chunks = plain_text_chunks(&artifacts[1], MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].ends_with("BBBB-2222"));
    }
}
