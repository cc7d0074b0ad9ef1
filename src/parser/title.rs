use crate::models::ParsedFile;
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

fn get_regex(re: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    re.get_or_init(|| Regex::new(pattern).expect("Invalid regex pattern defined in code"))
}

fn get_regex_ci(re: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    re.get_or_init(|| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("Invalid regex pattern defined in code")
    })
}

/// Parses a filename or release-style string into structured attributes.
///
/// Total and deterministic: never fails, unrecognized fields stay unset.
#[must_use]
pub fn parse_title(input: &str) -> ParsedFile {
    let (stem, extension) = split_extension(input);

    let (seasons, episodes, season_pack) = extract_seasons_episodes(stem);
    let year = extract_year(stem);

    ParsedFile {
        title: extract_release_title(stem, year, &seasons, &episodes),
        year,
        seasons,
        episodes,
        resolution: extract_resolution(stem),
        quality: extract_quality(stem),
        encode: extract_encode(stem),
        release_group: extract_group(stem),
        edition: extract_edition(stem),
        repack: is_repack(stem),
        remastered: is_remastered(stem),
        uncensored: is_uncensored(stem),
        unrated: is_unrated(stem),
        upscaled: is_upscaled(stem),
        network: extract_network(stem),
        container: extension.clone(),
        extension,
        visual_tags: extract_visual_tags(stem),
        audio_tags: extract_audio_tags(stem),
        audio_channels: extract_audio_channels(stem),
        languages: extract_languages(stem),
        folder_seasons: Vec::new(),
        folder_episodes: Vec::new(),
        season_pack,
    }
}

fn split_extension(input: &str) -> (&str, Option<String>) {
    const KNOWN: &[&str] = &["mkv", "mp4", "avi", "webm", "mov", "wmv", "m4v", "ts", "nzb"];
    if let Some((stem, ext)) = input.rsplit_once('.') {
        let lower = ext.to_ascii_lowercase();
        if KNOWN.contains(&lower.as_str()) {
            return (stem, Some(lower));
        }
    }
    (input, None)
}

fn extract_seasons_episodes(s: &str) -> (Vec<u32>, Vec<u32>, bool) {
    static SXXEXX: OnceLock<Regex> = OnceLock::new();
    static SXX_RANGE: OnceLock<Regex> = OnceLock::new();
    static SXX_ONLY: OnceLock<Regex> = OnceLock::new();
    static XFORMAT: OnceLock<Regex> = OnceLock::new();
    static SEASON_WORD: OnceLock<Regex> = OnceLock::new();
    static EP_WORD: OnceLock<Regex> = OnceLock::new();
    static PACK_WORD: OnceLock<Regex> = OnceLock::new();

    let mut seasons: Vec<u32> = Vec::new();
    let mut episodes: Vec<u32> = Vec::new();
    let mut season_pack = false;

    // S01E01, S01E01E02, S01E01-E03
    let sxxexx = get_regex_ci(&SXXEXX, r"\bS(\d{1,2})[ ._-]?E(\d{1,4})(?:[-E]+(\d{1,4}))?\b");
    for caps in sxxexx.captures_iter(s) {
        push_unique(&mut seasons, parse_num(caps.get(1)));
        let first = parse_num(caps.get(2));
        push_unique(&mut episodes, first);
        if let (Some(start), Some(end)) = (first, parse_num(caps.get(3))) {
            for ep in start..=end.min(start + 100) {
                push_unique(&mut episodes, Some(ep));
            }
        }
    }

    // 2x05
    let xformat = get_regex_ci(&XFORMAT, r"\b(\d{1,2})x(\d{2,3})\b");
    for caps in xformat.captures_iter(s) {
        push_unique(&mut seasons, parse_num(caps.get(1)));
        push_unique(&mut episodes, parse_num(caps.get(2)));
    }

    if episodes.is_empty() {
        // S01-S03 span: a multi-season pack
        let range = get_regex_ci(&SXX_RANGE, r"\bS(\d{1,2})[ ._-]*-[ ._-]*S?(\d{1,2})\b");
        if let Some(caps) = range.captures(s)
            && let (Some(start), Some(end)) = (parse_num(caps.get(1)), parse_num(caps.get(2)))
            && end >= start
        {
            for season in start..=end.min(start + 50) {
                push_unique(&mut seasons, Some(season));
            }
            season_pack = true;
        }

        // bare S02 with no episode: a season pack
        if seasons.is_empty() {
            let only = get_regex_ci(&SXX_ONLY, r"\bS(\d{1,2})\b");
            for caps in only.captures_iter(s) {
                push_unique(&mut seasons, parse_num(caps.get(1)));
            }
            if !seasons.is_empty() {
                season_pack = true;
            }
        }

        // "Season 2", "2nd Season"
        let word = get_regex_ci(
            &SEASON_WORD,
            r"\bSeason[ ._]?(\d{1,2})\b|\b(\d{1,2})(?:st|nd|rd|th)[ ._]?Season\b",
        );
        for caps in word.captures_iter(s) {
            let num = parse_num(caps.get(1)).or_else(|| parse_num(caps.get(2)));
            push_unique(&mut seasons, num);
            season_pack = true;
        }

        // "Episode 7", "E07"
        let ep = get_regex_ci(&EP_WORD, r"\b(?:Episode|Ep|E)[ ._]?(\d{1,4})\b");
        for caps in ep.captures_iter(s) {
            push_unique(&mut episodes, parse_num(caps.get(1)));
            season_pack = false;
        }

        // "- 07" anime style, last resort; years and resolutions excluded
        if episodes.is_empty() {
            static DASH_EP: OnceLock<Regex> = OnceLock::new();
            let dash = get_regex(&DASH_EP, r"-\s*(\d{1,4})(?:v\d+)?\s*(?:\s|$|\[|\()");
            if let Some(caps) = dash.captures(s)
                && let Some(ep) = parse_num(caps.get(1))
                && !(1990..=2099).contains(&ep)
                && ![480, 576, 720, 1080, 2160].contains(&ep)
            {
                push_unique(&mut episodes, Some(ep));
                season_pack = false;
            }
        }
    }

    let pack_word = get_regex_ci(
        &PACK_WORD,
        r"\b(?:Complete|Batch|Full[ ._]?Season|Collection|Completa)\b",
    );
    if pack_word.is_match(s) && episodes.is_empty() {
        season_pack = true;
    }

    (seasons, episodes, season_pack)
}

fn parse_num(m: Option<regex::Match<'_>>) -> Option<u32> {
    m.and_then(|m| m.as_str().parse().ok())
}

fn push_unique(list: &mut Vec<u32>, value: Option<u32>) {
    if let Some(v) = value
        && !list.contains(&v)
    {
        list.push(v);
    }
}

fn extract_year(s: &str) -> Option<i32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"[(\[. ](19\d{2}|20\d{2})[)\]. ]");
    re.captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn extract_resolution(s: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex_ci(&RE, r"\b(2160p|4K|1440p|1080p|720p|576p|480p|360p)\b");
    re.find(s).map(|m| {
        let res = m.as_str();
        if res.eq_ignore_ascii_case("4K") {
            "2160p".to_string()
        } else {
            res.to_lowercase()
        }
    })
}

fn extract_quality(s: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex_ci(
        &RE,
        r"\b(UHD[ ._-]?BluRay|Blu-?Ray|BDRip|BRRip|REMUX|WEB-?DL|WEBRip|WEB|HDTV|DVDRip|DVD|CAM|TS|SCR|TVRip)\b",
    );
    re.find(s).map(|m| {
        let src = m.as_str().to_uppercase().replace([' ', '.', '_'], "");
        match src.as_str() {
            "BLU-RAY" | "BLURAY" | "UHDBLURAY" | "UHD-BLURAY" => "BluRay".to_string(),
            "WEBDL" | "WEB-DL" | "WEB" => "WEB-DL".to_string(),
            "WEBRIP" => "WEBRip".to_string(),
            "BDRIP" | "BRRIP" => "BDRip".to_string(),
            "REMUX" => "Remux".to_string(),
            "HDTV" => "HDTV".to_string(),
            "DVDRIP" | "DVD" => "DVD".to_string(),
            "CAM" | "TS" | "SCR" | "TVRIP" => src.to_uppercase(),
            other => other.to_string(),
        }
    })
}

fn extract_encode(s: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex_ci(&RE, r"\b(x264|x265|H[ .]?264|H[ .]?265|HEVC|AVC|AV1|XviD|VP9)\b");
    re.find(s).map(|m| {
        let enc = m.as_str().to_uppercase().replace([' ', '.'], "");
        match enc.as_str() {
            "X265" | "H265" | "HEVC" => "HEVC".to_string(),
            "X264" | "H264" | "AVC" => "AVC".to_string(),
            other => other.to_string(),
        }
    })
}

fn extract_group(s: &str) -> Option<String> {
    // [Group] prefix, anime style
    static BRACKET: OnceLock<Regex> = OnceLock::new();
    let bracket = get_regex(&BRACKET, r"^\[([^\]]+)\]");
    if let Some(caps) = bracket.captures(s)
        && let Some(m) = caps.get(1)
        && !is_metadata_token(m.as_str())
    {
        return Some(m.as_str().trim().to_string());
    }

    // -GROUP suffix, scene style
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    let suffix = get_regex(&SUFFIX, r"-([A-Za-z0-9][A-Za-z0-9_]{1,24})$");
    if let Some(caps) = suffix.captures(s.trim())
        && let Some(m) = caps.get(1)
        && !is_metadata_token(m.as_str())
    {
        return Some(m.as_str().to_string());
    }
    None
}

fn is_metadata_token(s: &str) -> bool {
    if extract_resolution(s).is_some() || extract_quality(s).is_some() {
        return true;
    }
    let upper = s.to_uppercase();
    [
        "X264", "X265", "HEVC", "AVC", "AV1", "AAC", "FLAC", "AC3", "EAC3", "DTS", "TRUEHD",
        "OPUS", "10BIT", "HDR", "REMUX", "DV", "MULTI", "DUAL",
    ]
    .contains(&upper.as_str())
}

fn extract_edition(s: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex_ci(
        &RE,
        r"\b(Director'?s[ ._]?Cut|Extended(?:[ ._]?(?:Cut|Edition))?|Theatrical(?:[ ._]?Cut)?|Ultimate[ ._]?Edition|IMAX(?:[ ._]?Enhanced)?|Open[ ._]?Matte|Criterion)\b",
    );
    re.find(s).map(|m| m.as_str().replace(['.', '_'], " "))
}

fn extract_network(s: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(
        &RE,
        r"\b(AMZN|NF|DSNP|HMAX|MAX|ATVP|PCOK|HULU|iP|CR|FUNI|STAN|PMTP)\b",
    );
    re.find(s).map(|m| m.as_str().to_string())
}

fn extract_visual_tags(s: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A trailing word boundary cannot follow '+', so the HDR10+ form is its
    // own alternative without one.
    let re = get_regex_ci(
        &RE,
        r"\bHDR10\+|\b(?:HDR10|HDR|DV|DoVi|Dolby[ ._]?Vision|10[ ._-]?bit|SDR|3D)\b",
    );
    let mut tags = Vec::new();
    for m in re.find_iter(s) {
        let tag = m.as_str().to_uppercase().replace([' ', '.', '_', '-'], "");
        let canonical = match tag.as_str() {
            "DOVI" | "DOLBYVISION" => "DV".to_string(),
            "10BIT" => "10bit".to_string(),
            other => other.to_string(),
        };
        if !tags.contains(&canonical) {
            tags.push(canonical);
        }
    }
    tags
}

fn extract_audio_tags(s: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    // DD+ ends in '+', which cannot carry a trailing word boundary.
    let re = get_regex_ci(
        &RE,
        r"\bDD\+|\b(?:DTS-HD[ ._]?MA|DTS-X|DTS|TrueHD|Atmos|E-?AC-?3|AC-?3|DDP|DD|AAC|FLAC|OPUS|LPCM|MP3)\b",
    );
    let mut tags = Vec::new();
    for m in re.find_iter(s) {
        let tag = m.as_str().to_uppercase().replace([' ', '.', '_'], "");
        let canonical = match tag.as_str() {
            "DTS-HDMA" | "DTSHDMA" => "DTS-HD MA".to_string(),
            "EAC3" | "E-AC-3" | "DD+" | "DDP" => "DD+".to_string(),
            "AC3" | "AC-3" | "DD" => "DD".to_string(),
            other => other.to_string(),
        };
        if !tags.contains(&canonical) {
            tags.push(canonical);
        }
    }
    tags
}

fn extract_audio_channels(s: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"\b([2578]\.[01])\b");
    let mut channels = Vec::new();
    for m in re.find_iter(s) {
        let ch = m.as_str().to_string();
        if !channels.contains(&ch) {
            channels.push(ch);
        }
    }
    channels
}

fn extract_languages(s: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex_ci(
        &RE,
        r"\b(MULTi(?:-?Audio)?|DUAL(?:-?Audio)?|VOSTFR|English|Japanese|French|German|Spanish|Italian|Portuguese|Russian|Korean|Chinese|Hindi|ENG|JPN|FRE|GER|SPA|ITA|POR|RUS|KOR|CHI|HIN)\b",
    );
    let mut languages = Vec::new();
    for m in re.find_iter(s) {
        let lang = canonical_language(m.as_str());
        if !languages.contains(&lang) {
            languages.push(lang);
        }
    }
    languages
}

fn canonical_language(raw: &str) -> String {
    let upper = raw.to_uppercase();
    match upper.as_str() {
        "MULTI" | "MULTI-AUDIO" | "MULTIAUDIO" => "Multi".to_string(),
        "DUAL" | "DUAL-AUDIO" | "DUALAUDIO" => "Dual Audio".to_string(),
        "VOSTFR" => "French".to_string(),
        "ENG" => "English".to_string(),
        "JPN" => "Japanese".to_string(),
        "FRE" => "French".to_string(),
        "GER" => "German".to_string(),
        "SPA" => "Spanish".to_string(),
        "ITA" => "Italian".to_string(),
        "POR" => "Portuguese".to_string(),
        "RUS" => "Russian".to_string(),
        "KOR" => "Korean".to_string(),
        "CHI" => "Chinese".to_string(),
        "HIN" => "Hindi".to_string(),
        _ => {
            let mut chars = raw.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => raw.to_string(),
            }
        }
    }
}

fn is_repack(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex_ci(&RE, r"\b(?:REPACK|RERIP)\b").is_match(s)
}

fn is_remastered(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex_ci(&RE, r"\b(?:REMASTER(?:ED)?|RESTORED)\b").is_match(s)
}

fn is_uncensored(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex_ci(&RE, r"\bUNCENSORED\b").is_match(s)
}

fn is_unrated(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex_ci(&RE, r"\bUNRATED\b").is_match(s)
}

fn is_upscaled(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex_ci(&RE, r"\b(?:UPSCALED?|AI[ .-]?UPSCALE)\b").is_match(s)
}

/// The title is whatever comes before the first structural marker
/// (season/episode tag, year, resolution, quality).
fn extract_release_title(
    s: &str,
    year: Option<i32>,
    seasons: &[u32],
    episodes: &[u32],
) -> Option<String> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let marker = get_regex_ci(
        &MARKER,
        r"\bS\d{1,2}(?:[ ._-]?E\d{1,4})?\b|\b\d{1,2}x\d{2,3}\b|\bSeason[ ._]?\d{1,2}\b|[(\[. ](?:19|20)\d{2}[)\]. ]|\b(?:2160p|4K|1080p|720p|576p|480p)\b|\b(?:BluRay|Blu-Ray|WEB-?DL|WEBRip|HDTV|REMUX|BDRip)\b",
    );

    // Strip an anime-style [Group] prefix first.
    static BRACKET: OnceLock<Regex> = OnceLock::new();
    let bracket = get_regex(&BRACKET, r"^\[[^\]]+\][ ._-]*");
    let stripped = bracket.replace(s, "");

    let cut = marker.find(&stripped).map_or(stripped.len(), |m| m.start());
    let raw = &stripped[..cut];
    let cleaned = clean_title(raw);

    if cleaned.is_empty() {
        // No marker matched anything useful; the whole string may be a bare
        // title, but only if we found no structure at all.
        if year.is_none() && seasons.is_empty() && episodes.is_empty() {
            let whole = clean_title(&stripped);
            if !whole.is_empty() {
                return Some(whole);
            }
        }
        return None;
    }
    Some(cleaned)
}

#[must_use]
pub fn clean_title(title: &str) -> String {
    let mut result = String::with_capacity(title.len());
    let mut last_was_space = true;
    for c in title.chars() {
        let is_sep = c.is_whitespace() || c == '.' || c == '_';
        if is_sep {
            if !last_was_space {
                result.push(' ');
                last_was_space = true;
            }
        } else {
            result.push(c);
            last_was_space = false;
        }
    }
    result
        .trim_end_matches(['-', ' ', '('])
        .trim()
        .to_string()
}
