//! Compares the final response with the one the test helper fetched.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use url::Url;

use super::title::{titles_match, web_get_title};
use super::{FLAG_HTTP_DIFF, FLAG_SUCCESS};
use crate::archival::HttpRequestResult;
use crate::control::ThHttpRequestResult;
use crate::testkeys::TestKeys;

const BODY_PROPORTION_FACTOR: f64 = 0.7;

/// Headers most servers send, useless for telling two servers apart
const COMMON_HEADERS: [&str; 25] = [
    "date",
    "content-type",
    "server",
    "cache-control",
    "vary",
    "set-cookie",
    "location",
    "expires",
    "x-powered-by",
    "content-encoding",
    "last-modified",
    "accept-ranges",
    "pragma",
    "x-frame-options",
    "etag",
    "x-content-type-options",
    "age",
    "via",
    "p3p",
    "x-xss-protection",
    "content-language",
    "cf-ray",
    "strict-transport-security",
    "link",
    "x-varnish",
];

/// Both sides completed the request; decides between success and http-diff.
pub fn analyze(tk: &mut TestKeys, probe: &HttpRequestResult, control: &ThHttpRequestResult) {
    let Ok(url) = Url::parse(&probe.request.url) else {
        return;
    };
    if url.scheme() == "https" {
        info!("HTTP: HTTPS && no error => #{} is successful", probe.transaction_id);
        tk.x_blocking_flags |= FLAG_SUCCESS;
        return;
    }

    body_length_checks(tk, probe, control);
    tk.status_code_match = status_code_match(probe, control);
    tk.headers_match = headers_match(&probe.response.headers, &control.headers);
    tk.title_match = title_match(probe, control);

    if tk.status_code_match == Some(true) {
        let reasons = [
            ("bodyLengthMatch", tk.body_length_match),
            ("headersMatch", tk.headers_match),
            ("titleMatch", tk.title_match),
        ];
        if let Some((reason, _)) = reasons.iter().find(|(_, m)| *m == Some(true)) {
            info!("HTTP: statusCodeMatch && {} => #{} is successful", reason, probe.transaction_id);
            tk.x_blocking_flags |= FLAG_SUCCESS;
            return;
        }
    }

    warn!("HTTP: it seems #{} is a case of httpDiff", probe.transaction_id);
    tk.x_blocking_flags |= FLAG_HTTP_DIFF;
}

fn body_length_checks(tk: &mut TestKeys, probe: &HttpRequestResult, control: &ThHttpRequestResult) {
    let expected = control.body_length;
    if expected <= 0 || probe.response.body_is_truncated {
        return;
    }
    let measured = probe.response.body.len() as i64;
    if measured <= 0 {
        return;
    }
    let proportion = measured.min(expected) as f64 / measured.max(expected) as f64;
    tk.body_proportion = Some(proportion);
    tk.body_length_match = Some(proportion > BODY_PROPORTION_FACTOR);
}

fn status_code_match(probe: &HttpRequestResult, control: &ThHttpRequestResult) -> Option<bool> {
    let (measured, expected) = (probe.response.code, control.status_code);
    if expected <= 0 || measured <= 0 {
        return None;
    }
    let good = measured == expected;
    // a non-2xx control says little about what the page should look like
    if !good && expected / 100 != 2 {
        return None;
    }
    Some(good)
}

fn headers_match(measured: &BTreeMap<String, String>, expected: &BTreeMap<String, String>) -> Option<bool> {
    if measured.is_empty() || expected.is_empty() {
        return None;
    }
    let ours: BTreeSet<String> = measured.keys().map(|k| k.to_lowercase()).collect();
    let theirs: BTreeSet<String> = expected.keys().map(|k| k.to_lowercase()).collect();
    if ours == theirs {
        return Some(true);
    }
    let uncommon = |k: &&String| !COMMON_HEADERS.contains(&k.as_str());
    let found = ours.intersection(&theirs).filter(uncommon).next().is_some();
    Some(found)
}

fn title_match(probe: &HttpRequestResult, control: &ThHttpRequestResult) -> Option<bool> {
    let response = &probe.response;
    if response.code <= 0 || response.body_is_truncated || control.status_code <= 0 {
        return None;
    }
    let measured = web_get_title(&response.body.text());
    if control.title.is_empty() || measured.is_empty() {
        return None;
    }
    Some(titles_match(&measured, &control.title))
}
