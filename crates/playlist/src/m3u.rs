use chardetng::EncodingDetector;
use common::{join_location, normalize_location, relative_location};
use encoding_rs::{Encoding, UTF_8};
use tracing::{debug, warn};

use crate::resolve::{is_foreign_uri, PathResolver};
use crate::settings::PlaylistIoSettings;
use crate::PlaylistEntry;

const HEADER: &str = "#EXTM3U";
const EXTINF: &str = "#EXTINF:";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Charset {
    /// UTF-8 when the bytes are valid UTF-8, otherwise detected.
    #[default]
    Auto,
    Utf8,
    /// A WHATWG encoding label such as `windows-1252`.
    Named(String),
}

impl Charset {
    /// `.m3u8` is UTF-8 by definition; anything else is detected.
    pub fn for_file_name(name: &str) -> Self {
        if name.to_ascii_lowercase().ends_with(".m3u8") {
            Charset::Utf8
        } else {
            Charset::Auto
        }
    }

    /// Like [`Charset::for_file_name`], with `label` overriding detection.
    pub fn for_file(name: &str, label: Option<&str>) -> Self {
        match (Self::for_file_name(name), label.map(str::trim)) {
            (Charset::Auto, Some(label)) if !label.is_empty() => Charset::Named(label.to_string()),
            (charset, _) => charset,
        }
    }

    fn encoding(&self) -> &'static Encoding {
        match self {
            Charset::Auto | Charset::Utf8 => UTF_8,
            Charset::Named(label) => match Encoding::for_label(label.as_bytes()) {
                Some(encoding) => encoding,
                None => {
                    warn!("Unknown charset {:?}, using UTF-8", label);
                    UTF_8
                }
            },
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        let encoding = match self {
            Charset::Auto => match std::str::from_utf8(bytes) {
                Ok(text) => return strip_bom(text).to_string(),
                Err(_) => {
                    let mut detector = EncodingDetector::new();
                    detector.feed(bytes, true);
                    detector.guess(None, true)
                }
            },
            _ => self.encoding(),
        };
        let (decoded, used, had_errors) = encoding.decode(bytes);
        if had_errors {
            warn!("Decoding errors reading playlist as {}", used.name());
        }
        strip_bom(&decoded).to_string()
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        let encoding = self.encoding();
        if encoding == UTF_8 {
            return text.as_bytes().to_vec();
        }
        let (encoded, used, had_errors) = encoding.encode(text);
        if had_errors {
            warn!("Characters not representable in {} were replaced", used.name());
        }
        encoded.into_owned()
    }
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// `file://` URIs become plain paths; `file:///C:/x` becomes `C:/x`.
fn decode_file_uri(location: &str) -> String {
    let rest = match location.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("file://") => &location[7..],
        _ => return location.to_string(),
    };
    let decoded = match urlencoding::decode(rest) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => rest.to_string(),
    };
    let bytes = decoded.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        decoded[1..].to_string()
    } else {
        decoded
    }
}

fn parse_extinf(value: &str) -> (Option<u32>, Option<String>) {
    let (secs, title) = match value.split_once(',') {
        Some((secs, title)) => (secs, Some(title)),
        None => (value, None),
    };
    // Attributes such as `tvg-id="..."` may follow the duration.
    let secs = secs.split_whitespace().next().unwrap_or("");
    let duration_ms = secs
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0 && secs.is_finite())
        .map(|secs| (secs * 1000.0).round().min(u32::MAX as f64) as u32);
    let title = title
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string);
    (duration_ms, title)
}

/// Locations in file order with any `#EXTINF` metadata attached. Blank lines
/// and other comments are skipped; locations are trimmed but not resolved.
pub fn parse_m3u(text: &str) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    let mut pending: Option<(Option<u32>, Option<String>)> = None;
    for line in strip_bom(text).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix(EXTINF) {
            pending = Some(parse_extinf(info));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let (duration_ms, title) = pending.take().unwrap_or_default();
        entries.push(PlaylistEntry {
            location: decode_file_uri(line),
            title,
            duration_ms,
        });
    }
    entries
}

/// Parses `text` and joins every location against the library. Relative
/// lines are read against `base`, the directory the playlist lives in.
pub fn parse_entries(
    text: &str,
    base: &str,
    resolver: &PathResolver,
    settings: &PlaylistIoSettings,
) -> Vec<PlaylistEntry> {
    let mut out = Vec::new();
    for raw in parse_m3u(text) {
        if is_foreign_uri(&raw.location) {
            if !settings.remove_invalid {
                out.push(raw);
            }
            continue;
        }
        let location = join_location(base, &raw.location);
        if location.is_empty() {
            continue;
        }
        match resolver.resolve(&location, settings) {
            Some(track) => out.push(PlaylistEntry::from_track(track)),
            None if settings.remove_invalid => {
                debug!("Dropping unresolved playlist line {:?}", raw.location);
            }
            None => out.push(PlaylistEntry { location, ..raw }),
        }
    }
    out
}

pub fn read_playlist(
    bytes: &[u8],
    charset: &Charset,
    base: &str,
    resolver: &PathResolver,
    settings: &PlaylistIoSettings,
) -> Vec<PlaylistEntry> {
    parse_entries(&charset.decode(bytes), base, resolver, settings)
}

fn export_location(location: &str, settings: &PlaylistIoSettings) -> String {
    if is_foreign_uri(location) {
        return location.trim().to_string();
    }
    let exported = if settings.export_relative {
        relative_location(location, &settings.relative_base)
    } else {
        normalize_location(location)
    };
    // A bare leading `#` would read back as a comment.
    if exported.starts_with('#') {
        format!("./{}", exported)
    } else {
        exported
    }
}

/// `#EXTINF` titles must stay on one line.
fn single_line(title: &str) -> String {
    title
        .split(|c| c == '\r' || c == '\n')
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extended M3U text, one location per entry.
pub fn to_m3u(entries: &[PlaylistEntry], settings: &PlaylistIoSettings) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for entry in entries {
        if entry.title.is_some() || entry.duration_ms.is_some() {
            let secs = entry
                .duration_ms
                .map(|ms| i64::from(ms / 1000))
                .unwrap_or(-1);
            out.push_str(&format!(
                "{}{},{}\n",
                EXTINF,
                secs,
                single_line(entry.title.as_deref().unwrap_or(""))
            ));
        }
        out.push_str(&export_location(&entry.location, settings));
        out.push('\n');
    }
    out
}

pub fn write_playlist(
    entries: &[PlaylistEntry],
    settings: &PlaylistIoSettings,
    charset: &Charset,
) -> Vec<u8> {
    charset.encode(&to_m3u(entries, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Track;
    use std::sync::Arc;

    fn library(paths: &[&str]) -> (Vec<Arc<Track>>, PathResolver) {
        let tracks: Vec<Arc<Track>> = paths.iter().map(|p| Arc::new(Track::new(p))).collect();
        let resolver = PathResolver::new(&tracks);
        (tracks, resolver)
    }

    fn locations(entries: &[PlaylistEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.location.as_str()).collect()
    }

    const MATCHING_INPUT: &str = " dir/a \ndir/dir2/b\n#c\nD:\\D\ne\nhttp://invalid\n";

    #[test]
    fn only_library_paths_resolve() {
        let (_, resolver) = library(&["dir/a", "dir/dir2/b", "c", "dir3/d"]);
        let settings = PlaylistIoSettings::default();
        let entries = parse_entries(MATCHING_INPUT, "", &resolver, &settings);
        assert_eq!(
            locations(&entries),
            vec!["dir/a", "dir/dir2/b", "D:/D", "e", "http://invalid"]
        );
        let resolved: Vec<&str> = entries
            .iter()
            .filter(|e| resolver.resolve(&e.location, &settings).is_some())
            .map(|e| e.location.as_str())
            .collect();
        assert_eq!(resolved, vec!["dir/a", "dir/dir2/b"]);
    }

    #[test]
    fn remove_invalid_drops_unresolved_and_foreign() {
        let (_, resolver) = library(&["dir/a", "dir/dir2/b", "c", "dir3/d"]);
        let settings = PlaylistIoSettings {
            remove_invalid: true,
            ..PlaylistIoSettings::default()
        };
        let entries = parse_entries(MATCHING_INPUT, "", &resolver, &settings);
        assert_eq!(locations(&entries), vec!["dir/a", "dir/dir2/b"]);
    }

    #[test]
    fn export_then_import_reproduces_paths() {
        let paths = [
            "/music/Queen/Innuendo/01 Innuendo.flac",
            "/music/Björk/Post/Army of Me.mp3",
            "/music/a,b/#hash.ogg",
            "relative/track.mp3",
        ];
        let (tracks, resolver) = library(&paths);
        let entries: Vec<PlaylistEntry> =
            tracks.iter().map(|t| PlaylistEntry::from_track(t)).collect();
        let settings = PlaylistIoSettings::default();
        let text = to_m3u(&entries, &settings);
        assert!(text.starts_with("#EXTM3U\n#EXTINF:-1,01 Innuendo\n"));
        let parsed = parse_entries(&text, "", &resolver, &settings);
        assert_eq!(locations(&parsed), paths.to_vec());
    }

    #[test]
    fn relative_export_reads_back_against_base() {
        let (tracks, resolver) = library(&["/music/a/1.mp3", "/music/2.mp3"]);
        let settings = PlaylistIoSettings {
            export_relative: true,
            relative_base: "/music/lists".to_string(),
            ..PlaylistIoSettings::default()
        };
        let entries: Vec<PlaylistEntry> = tracks.iter().map(|t| PlaylistEntry::new(&t.path)).collect();
        let text = to_m3u(&entries, &settings);
        assert_eq!(text, "#EXTM3U\n../a/1.mp3\n../2.mp3\n");
        let parsed = parse_entries(&text, "/music/lists", &resolver, &settings);
        assert_eq!(locations(&parsed), vec!["/music/a/1.mp3", "/music/2.mp3"]);
    }

    #[test]
    fn multi_line_titles_stay_in_their_extinf() {
        let (_, resolver) = library(&[]);
        let entries = vec![
            PlaylistEntry {
                location: "/x/a.mp3".to_string(),
                title: Some("First\r\nSecond\nThird".to_string()),
                duration_ms: Some(61_000),
            },
            PlaylistEntry::new("/x/b.mp3"),
        ];
        let settings = PlaylistIoSettings::default();
        let text = to_m3u(&entries, &settings);
        assert!(text.contains("#EXTINF:61,First Second Third\n/x/a.mp3\n"));
        let parsed = parse_entries(&text, "", &resolver, &settings);
        assert_eq!(locations(&parsed), vec!["/x/a.mp3", "/x/b.mp3"]);
        assert_eq!(parsed[0].title.as_deref(), Some("First Second Third"));
    }

    #[test]
    fn hash_named_files_are_not_read_as_comments() {
        let (tracks, resolver) = library(&["/music/#1 Hit.mp3", "#2 Hit.mp3"]);
        let relative = PlaylistIoSettings {
            export_relative: true,
            relative_base: "/music".to_string(),
            ..PlaylistIoSettings::default()
        };
        let entries: Vec<PlaylistEntry> = tracks.iter().map(|t| PlaylistEntry::new(&t.path)).collect();
        let text = to_m3u(&entries[..1], &relative);
        assert_eq!(text, "#EXTM3U\n./#1 Hit.mp3\n");
        let parsed = parse_entries(&text, "/music", &resolver, &relative);
        assert_eq!(locations(&parsed), vec!["/music/#1 Hit.mp3"]);

        let settings = PlaylistIoSettings::default();
        let text = to_m3u(&entries[1..], &settings);
        let parsed = parse_entries(&text, "", &resolver, &settings);
        assert_eq!(locations(&parsed), vec!["#2 Hit.mp3"]);
    }

    #[test]
    fn extinf_attaches_to_next_location() {
        let text = "#EXTM3U\n#EXTINF:125,Artist - Song\n/x/song.mp3\n/x/other.mp3\n#EXTINF:abc\n/x/third.mp3\n";
        let entries = parse_m3u(text);
        assert_eq!(entries[0].title.as_deref(), Some("Artist - Song"));
        assert_eq!(entries[0].duration_ms, Some(125_000));
        assert_eq!(entries[1].title, None);
        assert_eq!(entries[2].duration_ms, None);
    }

    #[test]
    fn unresolved_entries_keep_extinf_metadata() {
        let (_, resolver) = library(&[]);
        let text = "#EXTINF:10,Lost\n/gone.mp3\n";
        let entries = parse_entries(text, "", &resolver, &PlaylistIoSettings::default());
        assert_eq!(entries[0].title.as_deref(), Some("Lost"));
        assert_eq!(entries[0].duration_ms, Some(10_000));
    }

    #[test]
    fn file_uris_decode_to_paths() {
        let (_, resolver) = library(&["/music/My Song.mp3", "C:/Music/x.mp3"]);
        let text = "file:///music/My%20Song.mp3\nFILE:///C:/Music/x.mp3\n";
        let settings = PlaylistIoSettings::default();
        let entries = parse_entries(text, "", &resolver, &settings);
        assert_eq!(locations(&entries), vec!["/music/My Song.mp3", "C:/Music/x.mp3"]);
    }

    #[test]
    fn charset_selection_and_bom() {
        assert_eq!(Charset::for_file_name("Mix.M3U8"), Charset::Utf8);
        assert_eq!(Charset::for_file_name("mix.m3u"), Charset::Auto);
        assert_eq!(
            Charset::for_file("mix.m3u", Some("windows-1252")),
            Charset::Named("windows-1252".to_string())
        );
        assert_eq!(Charset::for_file("mix.m3u8", Some("windows-1252")), Charset::Utf8);

        let with_bom = b"\xEF\xBB\xBF/music/a.mp3\n";
        assert_eq!(Charset::Auto.decode(with_bom), "/music/a.mp3\n");
        assert_eq!(Charset::Utf8.decode(with_bom), "/music/a.mp3\n");
    }

    #[test]
    fn named_charset_round_trips() {
        let charset = Charset::Named("windows-1252".to_string());
        let bytes = charset.encode("/music/Café.mp3\n");
        assert_eq!(bytes, b"/music/Caf\xE9.mp3\n".to_vec());
        assert_eq!(charset.decode(&bytes), "/music/Café.mp3\n");
    }
}
