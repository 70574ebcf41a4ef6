//! HTTP/1.0 responses sent to listeners.

use http::StatusCode;

use crate::protocol_constants::{AUDIO_CONTENT_TYPE, SERVER_ID};
use crate::stream::{AudioFormat, MountpointSettings};

/// Strips characters that would break out of a header line.
fn header_value(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

/// Builds the `200 OK` response that starts an ICY stream.
///
/// `metaint` is `Some(period)` only when the client asked for metadata and
/// the mountpoint has a non-zero metadata period.
pub fn icy_response(format: &AudioFormat, mount: &MountpointSettings, metaint: Option<usize>) -> String {
    let mut response = format!(
        "HTTP/1.0 200 OK\r\n\
         Content-Type: {}\r\n\
         icy-br:{}\r\n\
         ice-audio-info: bitrate={};channels={};samplerate={}\r\n\
         icy-name:{}\r\n\
         icy-description:{}\r\n\
         icy-genre:{}\r\n\
         icy-url:{}\r\n\
         icy-pub:0\r\n",
        AUDIO_CONTENT_TYPE,
        format.kbps(),
        format.kbps(),
        format.channels,
        format.sample_rate,
        header_value(&mount.station_name),
        header_value(&mount.station_description),
        header_value(&mount.station_genre),
        header_value(&mount.station_url),
    );

    if let Some(period) = metaint {
        response.push_str(&format!("icy-metaint:{}\r\n", period));
    }

    response.push_str(&format!(
        "Server: {}\r\n\
         Cache-Control: no-cache\r\n\
         \r\n",
        SERVER_ID
    ));
    response
}

/// Builds an HTML error response for a rejected request.
pub fn error_response(status: StatusCode, message: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Error");
    let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
    let message = html_escape::encode_text(message);

    format!(
        "HTTP/1.0 {code} {reason}\r\n\
         Content-Type: text/html\r\n\
         Date: {date}\r\n\
         Server: {server}\r\n\
         \r\n\
         <html><head><title>{code} {reason}</title></head>\
         <body><h1>{code} {reason}</h1><p>{message}</p></body></html>\r\n",
        code = status.as_u16(),
        reason = reason,
        date = date,
        server = SERVER_ID,
        message = message,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount() -> MountpointSettings {
        MountpointSettings {
            station_name: "Test FM".to_string(),
            station_description: "All tests, all the time".to_string(),
            station_genre: "Rock".to_string(),
            station_url: "http://example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn icy_response_has_station_headers() {
        let response = icy_response(&AudioFormat::new(128_000, 2, 44_100), &mount(), None);
        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.contains("Content-Type: audio/mpeg\r\n"));
        assert!(response.contains("icy-br:128\r\n"));
        assert!(response.contains("ice-audio-info: bitrate=128;channels=2;samplerate=44100\r\n"));
        assert!(response.contains("icy-name:Test FM\r\n"));
        assert!(response.contains("icy-description:All tests, all the time\r\n"));
        assert!(response.contains("icy-genre:Rock\r\n"));
        assert!(response.contains("icy-url:http://example.com\r\n"));
        assert!(response.contains("icy-pub:0\r\n"));
        assert!(response.contains("Cache-Control: no-cache\r\n"));
        assert!(!response.contains("icy-metaint"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn icy_response_advertises_metaint() {
        let response = icy_response(&AudioFormat::default(), &mount(), Some(16_000));
        assert!(response.contains("icy-metaint:16000\r\n"));
    }

    #[test]
    fn station_strings_cannot_inject_headers() {
        let mut mount = mount();
        mount.station_name = "Evil\r\nX-Injected: 1".to_string();
        let response = icy_response(&AudioFormat::default(), &mount, None);
        assert!(response.contains("icy-name:EvilX-Injected: 1\r\n"));
    }

    #[test]
    fn error_response_is_html() {
        let response = error_response(StatusCode::METHOD_NOT_ALLOWED, "POST <not> allowed");
        assert!(response.starts_with("HTTP/1.0 405 Method Not Allowed\r\n"));
        assert!(response.contains("Content-Type: text/html\r\n"));
        assert!(response.contains("Date: "));
        assert!(response.contains("POST &lt;not&gt; allowed"));
    }
}
