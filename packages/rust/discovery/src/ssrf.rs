//! SSRF guard shared by the BFS crawler and the Fetch Engine's web path
//! (§4.4.1). Grounded in the teacher crawler's `is_ssrf_target`/`is_private_ip`.

use std::net::IpAddr;

use url::Url;

/// True if `url` should never be navigated to by the browser-page adapter.
pub fn is_ssrf_target(url: &Url, allow_localhost: bool) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    let Some(host) = url.host_str() else {
        return true;
    };

    if allow_localhost {
        return false;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_private_ip(&ip);
    }

    host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_non_http_schemes() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(is_ssrf_target(&url, false));
    }

    #[test]
    fn blocks_private_ips() {
        for raw in ["http://192.168.1.1/admin", "http://10.0.0.1/", "http://127.0.0.1:8080/"] {
            let url = Url::parse(raw).unwrap();
            assert!(is_ssrf_target(&url, false), "{raw} should be blocked");
        }
    }

    #[test]
    fn blocks_localhost_hostname() {
        let url = Url::parse("http://localhost:3000/api").unwrap();
        assert!(is_ssrf_target(&url, false));
    }

    #[test]
    fn allows_public_hosts() {
        let url = Url::parse("https://docs.example.com/page").unwrap();
        assert!(!is_ssrf_target(&url, false));
    }

    #[test]
    fn allow_localhost_knob_permits_loopback() {
        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert!(!is_ssrf_target(&url, true));
    }
}
