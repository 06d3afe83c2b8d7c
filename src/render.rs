#![forbid(unsafe_code)]

//! Server-side HTML for the playlist and notice pages.
//!
//! Pages are self-contained: inline CSS, inline script, playlist data embedded
//! as JSON. Audio is requested (`muted=false`) but never forced; when the
//! browser refuses autoplay with sound the viewer gets a start button.

use std::fmt::Write as _;

use html_escape::encode_text;
use serde::Serialize;

use crate::clips::Clip;

const EMBED_ENDPOINT: &str = "https://clips.twitch.tv/embed";

/// What element plays the clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    /// Platform iframe, `src` holds the clip slug.
    Embed,
    /// Native `<video>`, `src` holds a file URL.
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Opaque page with the full info card.
    Full,
    /// Transparent background and a slim caption, for OBS browser sources.
    Overlay,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: String,
    pub creator: String,
    pub views: u64,
    pub duration: f64,
    pub src: String,
}

impl PlaylistEntry {
    pub fn embed(clip: &Clip) -> Self {
        Self::with_src(clip, clip.id.clone())
    }

    pub fn video(clip: &Clip, src: String) -> Self {
        Self::with_src(clip, src)
    }

    fn with_src(clip: &Clip, src: String) -> Self {
        Self {
            id: clip.id.clone(),
            title: clip.title.clone(),
            creator: clip.creator_name.clone(),
            views: clip.view_count,
            duration: clip.duration,
            src,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaylistPage {
    pub heading: String,
    pub surface: Surface,
    pub layout: Layout,
    pub autoplay: bool,
    pub interval_secs: u64,
    pub entries: Vec<PlaylistEntry>,
    /// Shown above the player, e.g. when fallback clips are in use.
    pub banner: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerConfig<'a> {
    surface: Surface,
    autoplay: bool,
    interval_ms: u64,
    embed_endpoint: &'static str,
    entries: &'a [PlaylistEntry],
}

pub fn render_playlist(page: &PlaylistPage) -> String {
    let config = PlayerConfig {
        surface: page.surface,
        autoplay: page.autoplay,
        interval_ms: page.interval_secs.saturating_mul(1000),
        embed_endpoint: EMBED_ENDPOINT,
        entries: &page.entries,
    };
    let heading = encode_text(&page.heading);
    let total = page.entries.len();

    let mut html = String::with_capacity(8 * 1024);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(html, "<title>{heading}</title>");
    html.push_str("<style>\n");
    html.push_str(BASE_CSS);
    html.push_str(match page.layout {
        Layout::Full => FULL_CSS,
        Layout::Overlay => OVERLAY_CSS,
    });
    html.push_str("</style>\n</head>\n");
    let _ = writeln!(
        html,
        "<body class=\"{}\">",
        match page.layout {
            Layout::Full => "full",
            Layout::Overlay => "overlay",
        }
    );
    html.push_str("<div class=\"container\">\n");
    if let Some(banner) = &page.banner {
        let _ = writeln!(html, "<div class=\"banner\">{}</div>", encode_text(banner));
    }
    html.push_str(match page.surface {
        Surface::Embed => {
            "<iframe id=\"player\" allow=\"autoplay; fullscreen\" allowfullscreen></iframe>\n"
        }
        Surface::Video => "<video id=\"player\" playsinline preload=\"auto\"></video>\n",
    });
    html.push_str("<button id=\"start\" class=\"start\" hidden>Click to start playback</button>\n");
    html.push_str("<div class=\"info\">\n");
    let _ = writeln!(html, "<div id=\"title\" class=\"title\">{heading}</div>");
    html.push_str("<div id=\"meta\" class=\"meta\"></div>\n");
    let _ = writeln!(
        html,
        "<div class=\"count\">Clip <span id=\"num\">1</span> of {total}</div>"
    );
    html.push_str("</div>\n<div id=\"progress\" class=\"progress\"></div>\n</div>\n");
    let _ = writeln!(
        html,
        "<script>\nconst CONFIG = {};\n{PLAYER_JS}</script>",
        script_json(&config)
    );
    html.push_str("</body>\n</html>\n");
    html
}

/// Plain page with a heading, a message, and optional bullet points.
pub fn render_notice(title: &str, message: &str, details: &[String]) -> String {
    let title = encode_text(title);
    let mut html = String::with_capacity(2048);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n");
    let _ = writeln!(html, "<title>{title}</title>");
    html.push_str("<style>\n");
    html.push_str(BASE_CSS);
    html.push_str(NOTICE_CSS);
    html.push_str("</style>\n</head>\n<body class=\"notice\">\n<main>\n");
    let _ = writeln!(html, "<h1>{title}</h1>");
    let _ = writeln!(html, "<p>{}</p>", encode_text(message));
    if !details.is_empty() {
        html.push_str("<ul>\n");
        for detail in details {
            let _ = writeln!(html, "<li>{}</li>", encode_text(detail));
        }
        html.push_str("</ul>\n");
    }
    html.push_str("</main>\n</body>\n</html>\n");
    html
}

/// JSON that is safe to drop inside a `<script>` element.
fn script_json<T: Serialize>(value: &T) -> String {
    let raw = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    raw.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

const BASE_CSS: &str = "\
* { box-sizing: border-box; }
body { margin: 0; color: #fff; font-family: Arial, Helvetica, sans-serif; overflow: hidden; }
.container { width: 100vw; height: 100vh; position: relative; }
#player { width: 100%; height: 100%; border: none; background: #000; display: block; }
.progress { position: absolute; bottom: 0; left: 0; height: 4px; width: 0%; background: #9146ff; transition: width 0.1s linear; }
.banner { position: absolute; top: 0; left: 0; right: 0; padding: 8px 16px; background: rgba(145, 70, 255, 0.85); z-index: 2; }
.start { position: absolute; top: 50%; left: 50%; transform: translate(-50%, -50%); padding: 16px 28px; font-size: 1.2em; color: #fff; background: #9146ff; border: none; border-radius: 8px; cursor: pointer; z-index: 3; }
";

const FULL_CSS: &str = "\
body.full { background: #000; }
.info { position: absolute; bottom: 20px; left: 20px; max-width: 60vw; background: rgba(0, 0, 0, 0.8); padding: 15px; border-radius: 10px; border-left: 4px solid #9146ff; }
.title { font-size: 1.3em; font-weight: bold; margin-bottom: 4px; }
.meta, .count { opacity: 0.85; font-size: 0.95em; }
";

const OVERLAY_CSS: &str = "\
body.overlay { background: transparent; }
.info { position: absolute; top: 12px; left: 12px; padding: 6px 10px; border-radius: 6px; background: rgba(0, 0, 0, 0.55); font-size: 0.9em; }
.title { font-weight: bold; }
.meta { display: none; }
.count { opacity: 0.8; font-size: 0.85em; }
";

const NOTICE_CSS: &str = "\
body.notice { background: #0e0e10; overflow: auto; }
main { max-width: 640px; margin: 12vh auto; padding: 24px 28px; background: #18181b; border-radius: 10px; border-left: 4px solid #9146ff; }
h1 { margin-top: 0; font-size: 1.5em; }
li { margin: 6px 0; font-family: monospace; }
";

const PLAYER_JS: &str = r#"(function () {
  const entries = CONFIG.entries;
  const player = document.getElementById('player');
  const progress = document.getElementById('progress');
  const startButton = document.getElementById('start');
  let index = 0;
  let advanceTimer = null;
  let progressTimer = null;

  function clearTimers() {
    if (advanceTimer) clearTimeout(advanceTimer);
    if (progressTimer) clearInterval(progressTimer);
    advanceTimer = null;
    progressTimer = null;
  }

  function setProgress(fraction) {
    progress.style.width = Math.min(Math.max(fraction, 0), 1) * 100 + '%';
  }

  function describe(entry, position) {
    document.getElementById('num').textContent = position + 1;
    document.getElementById('title').textContent = entry.title || entry.id;
    const parts = [];
    if (entry.creator) parts.push('clipped by ' + entry.creator);
    if (entry.views) parts.push(entry.views.toLocaleString() + ' views');
    document.getElementById('meta').textContent = parts.join(' · ');
  }

  function next() {
    clearTimers();
    setProgress(0);
    index = (index + 1) % entries.length;
    setTimeout(play, 500);
  }

  function playEmbed(entry) {
    const params = new URLSearchParams({
      clip: entry.src,
      parent: window.location.hostname,
      autoplay: String(CONFIG.autoplay),
      muted: 'false'
    });
    player.src = CONFIG.embedEndpoint + '?' + params.toString();
    const started = Date.now();
    progressTimer = setInterval(function () {
      setProgress((Date.now() - started) / CONFIG.intervalMs);
    }, 100);
    advanceTimer = setTimeout(next, CONFIG.intervalMs);
  }

  // Fallback advance in case `ended` never fires; counts from the moment
  // playback actually runs, so a paused or not-yet-started clip stays put.
  function armAdvance() {
    if (advanceTimer) clearTimeout(advanceTimer);
    const entry = entries[index];
    const total = player.duration > 0 ? player.duration : entry.duration;
    const remaining = total > 0 ? (total - player.currentTime + 1) * 1000 : CONFIG.intervalMs;
    advanceTimer = setTimeout(next, Math.max(remaining, 1000));
  }

  function playVideo(entry) {
    player.src = entry.src;
    if (CONFIG.autoplay) {
      const attempt = player.play();
      if (attempt && attempt.catch) {
        attempt.catch(function () {
          startButton.hidden = false;
        });
      }
    } else {
      startButton.hidden = false;
    }
  }

  function play() {
    if (entries.length === 0) return;
    const entry = entries[index];
    describe(entry, index);
    if (CONFIG.surface === 'video') {
      playVideo(entry);
    } else {
      playEmbed(entry);
    }
  }

  if (CONFIG.surface === 'video') {
    player.addEventListener('timeupdate', function () {
      if (player.duration > 0) setProgress(player.currentTime / player.duration);
    });
    player.addEventListener('playing', armAdvance);
    player.addEventListener('pause', function () {
      if (advanceTimer) clearTimeout(advanceTimer);
      advanceTimer = null;
    });
    player.addEventListener('ended', next);
    player.addEventListener('error', next);
  }

  startButton.addEventListener('click', function () {
    startButton.hidden = true;
    if (CONFIG.surface === 'video') {
      player.play();
    } else {
      clearTimers();
      play();
    }
  });

  setTimeout(play, 1000);
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clips::sample_clip;

    fn page(surface: Surface, layout: Layout, entries: Vec<PlaylistEntry>) -> PlaylistPage {
        PlaylistPage {
            heading: "TickleFitz Clips".to_string(),
            surface,
            layout,
            autoplay: true,
            interval_secs: 45,
            entries,
            banner: None,
        }
    }

    fn embedded_config(html: &str) -> serde_json::Value {
        let start = html.find("const CONFIG = ").unwrap() + "const CONFIG = ".len();
        let end = start + html[start..].find(";\n").unwrap();
        serde_json::from_str(&html[start..end]).unwrap()
    }

    #[test]
    fn embed_page_carries_every_clip_in_order() {
        let clips = [sample_clip("a", 30), sample_clip("b", 20), sample_clip("c", 10)];
        let html = render_playlist(&page(
            Surface::Embed,
            Layout::Full,
            clips.iter().map(PlaylistEntry::embed).collect(),
        ));

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<iframe id=\"player\""));
        assert!(html.contains("of 3</div>"));
        let config = embedded_config(&html);
        assert_eq!(config["surface"], "embed");
        assert_eq!(config["intervalMs"], 45_000);
        let srcs: Vec<&str> = config["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["src"].as_str().unwrap())
            .collect();
        assert_eq!(srcs, vec!["a", "b", "c"]);
    }

    #[test]
    fn video_page_uses_native_element() {
        let clip = sample_clip("a", 1);
        let html = render_playlist(&page(
            Surface::Video,
            Layout::Full,
            vec![PlaylistEntry::video(&clip, "https://cdn.example/a.mp4".into())],
        ));
        assert!(html.contains("<video id=\"player\""));
        assert!(!html.contains("<iframe"));
        let config = embedded_config(&html);
        assert_eq!(config["entries"][0]["src"], "https://cdn.example/a.mp4");
        assert_eq!(config["entries"][0]["duration"], 28.5);
    }

    #[test]
    fn video_advance_waits_for_playback() {
        let start = PLAYER_JS.find("function playVideo").unwrap();
        let end = start + PLAYER_JS[start..].find("function play()").unwrap();
        assert!(!PLAYER_JS[start..end].contains("setTimeout(next"));
        assert!(PLAYER_JS.contains("addEventListener('playing', armAdvance)"));
        assert!(PLAYER_JS.contains("addEventListener('pause'"));
    }

    #[test]
    fn overlay_layout_is_transparent() {
        let html = render_playlist(&page(Surface::Embed, Layout::Overlay, Vec::new()));
        assert!(html.contains("<body class=\"overlay\">"));
        assert!(html.contains("background: transparent"));
    }

    #[test]
    fn titles_cannot_break_out_of_the_script() {
        let mut clip = sample_clip("a", 1);
        clip.title = "</script><script>alert(1)</script>".into();
        let mut rendered = page(Surface::Embed, Layout::Full, vec![PlaylistEntry::embed(&clip)]);
        rendered.heading = "<b>clips</b>".into();
        let html = render_playlist(&rendered);
        assert!(!html.contains("</script><script>alert"));
        assert!(html.contains("&lt;b&gt;clips&lt;/b&gt;"));
        assert_eq!(
            embedded_config(&html)["entries"][0]["title"],
            "</script><script>alert(1)</script>"
        );
    }

    #[test]
    fn banner_is_escaped() {
        let mut rendered = page(Surface::Embed, Layout::Full, Vec::new());
        rendered.banner = Some("API down & using <fallback>".into());
        let html = render_playlist(&rendered);
        assert!(html.contains("API down &amp; using &lt;fallback&gt;"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let clips = [sample_clip("a", 3), sample_clip("b", 2)];
        let build = || {
            render_playlist(&page(
                Surface::Embed,
                Layout::Full,
                clips.iter().map(PlaylistEntry::embed).collect(),
            ))
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn notice_lists_details() {
        let html = render_notice(
            "Setup required",
            "Set the following variables:",
            &["TWITCH_CLIENT_ID".to_string(), "TWITCH_CLIENT_SECRET".to_string()],
        );
        assert!(html.contains("<h1>Setup required</h1>"));
        assert!(html.contains("<li>TWITCH_CLIENT_ID</li>"));
        assert!(html.contains("<li>TWITCH_CLIENT_SECRET</li>"));
    }
}
