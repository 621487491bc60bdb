//! Prometheus text exposition of the sidecar's metrics.
//!
//! Every scrape gets its own [`Registry`], so nothing from an earlier scrape
//! (such as a bucket that has since disappeared) leaks into the output.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::classify::PortUsage;

pub const PORT_TOTAL: &str = "port_total";
pub const PORT_USED: &str = "port_used";
pub const PORT_USAGE: &str = "port_usage";

/// Percentage of the local port range in use; `0.0` if the range is empty.
pub fn usage_percentage(used: u64, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * used as f64 / f64::from(total)
}

/// Content type of the text exposition format.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_owned()
}

fn register_gauge(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Renders the sidecar's metrics for one scrape.
///
/// `port_used` gets one sample per `(remote_addr, state)` bucket. An empty
/// `OTHER` bucket produces no samples; with no buckets at all the
/// `port_used` family is left out of the output.
///
/// # Errors
///
/// Returns a [`prometheus::Error`] if a metric can't be registered or encoded.
pub fn render(pod_name: &str, port_total: u32, usage: &PortUsage) -> prometheus::Result<String> {
    let registry = Registry::new();
    let total = register_gauge(&registry, PORT_TOTAL, "Total Local Port Count", &["pod_name"])?;
    let used = register_gauge(
        &registry,
        PORT_USED,
        "Used Local Port Count",
        &["pod_name", "remote_addr", "state"],
    )?;
    let percentage = register_gauge(
        &registry,
        PORT_USAGE,
        "Local Port Usage Percentage",
        &["pod_name"],
    )?;

    total
        .with_label_values(&[pod_name])
        .set(f64::from(port_total));
    for (remote_addr, state, count) in usage.buckets() {
        used.with_label_values(&[pod_name, remote_addr, state])
            .set(count as f64);
    }
    percentage
        .with_label_values(&[pod_name])
        .set(usage_percentage(usage.total_used(), port_total));

    TextEncoder::new().encode_to_string(&registry.gather())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{OTHER_LABEL, WellKnownPorts, classify};
    use crate::inspector::{ConnectionRecord, TcpState};
    use std::net::{IpAddr, Ipv4Addr};

    fn conn(remote_port: u16, state: TcpState) -> ConnectionRecord {
        ConnectionRecord {
            local_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            local_port: 41000,
            remote_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
            remote_port,
            state,
        }
    }

    /// Value of the first sample line starting with `prefix`.
    fn sample_value(text: &str, prefix: &str) -> f64 {
        let line = text
            .lines()
            .find(|line| line.starts_with(prefix))
            .unwrap_or_else(|| panic!("no sample `{prefix}` in:\n{text}"));
        line.rsplit_once(' ').unwrap().1.parse().unwrap()
    }

    #[test]
    fn test_usage_percentage() {
        assert_eq!(usage_percentage(0, 100), 0.0);
        assert_eq!(usage_percentage(25, 100), 25.0);
        assert_eq!(usage_percentage(5, 0), 0.0);
        assert!(usage_percentage(u64::MAX, 1).is_finite());
    }

    #[test]
    fn test_render_empty_usage() {
        let usage = classify(&[], WellKnownPorts::standard());
        let text = render("pod-a", 100, &usage).unwrap();

        assert!(text.contains("# HELP port_total Total Local Port Count\n"));
        assert!(text.contains("# TYPE port_total gauge\n"));
        assert_eq!(sample_value(&text, "port_total{pod_name=\"pod-a\"}"), 100.0);
        assert_eq!(sample_value(&text, "port_usage{pod_name=\"pod-a\"}"), 0.0);
        assert!(!text.contains("port_used{"));
    }

    #[test]
    fn test_render_zero_total() {
        let usage = classify(&[conn(443, TcpState::Established)], WellKnownPorts::standard());
        let text = render("pod-a", 0, &usage).unwrap();

        assert_eq!(sample_value(&text, "port_usage{"), 0.0);
        assert!(!text.contains("NaN"));
        assert!(!text.contains("Inf"));
    }

    #[test]
    fn test_render_buckets() {
        let usage = classify(
            &[
                conn(443, TcpState::Established),
                conn(443, TcpState::Established),
                conn(80, TcpState::TimeWait),
                conn(54321, TcpState::Established),
            ],
            WellKnownPorts::standard(),
        );
        let text = render("pod-a", 200, &usage).unwrap();

        assert_eq!(
            sample_value(
                &text,
                "port_used{pod_name=\"pod-a\",remote_addr=\"10.0.0.7 [443:https]\",state=\"ESTABLISHED\"}"
            ),
            2.0
        );
        assert_eq!(
            sample_value(
                &text,
                "port_used{pod_name=\"pod-a\",remote_addr=\"10.0.0.7 [80:http]\",state=\"TIME_WAIT\"}"
            ),
            1.0
        );
        assert_eq!(
            sample_value(
                &text,
                &format!("port_used{{pod_name=\"pod-a\",remote_addr=\"{OTHER_LABEL}\",state=\"ESTABLISHED\"}}")
            ),
            1.0
        );
        assert_eq!(sample_value(&text, "port_usage{"), 2.0);
    }

    #[test]
    fn test_pod_name_is_escaped() {
        let usage = classify(&[], WellKnownPorts::standard());
        let text = render("a\"b\\c", 10, &usage).unwrap();

        assert!(text.contains(r#"port_total{pod_name="a\"b\\c"}"#));
    }

    #[test]
    fn test_type_lines_appear_once() {
        let conns: Vec<_> = (1..50u16).map(|p| conn(p, TcpState::Established)).collect();
        let usage = classify(&conns, WellKnownPorts::standard());
        let text = render("pod-a", 28232, &usage).unwrap();

        for name in [PORT_TOTAL, PORT_USED, PORT_USAGE] {
            let type_line = format!("# TYPE {name} gauge");
            assert_eq!(text.lines().filter(|l| *l == type_line).count(), 1);
        }
        assert_eq!(
            text.lines().filter(|l| l.starts_with("port_used{")).count(),
            49
        );
    }

    #[test]
    fn test_each_scrape_starts_fresh() {
        let busy = classify(&[conn(443, TcpState::Established)], WellKnownPorts::standard());
        let idle = classify(&[], WellKnownPorts::standard());

        assert!(render("pod-a", 10, &busy).unwrap().contains("port_used{"));
        assert!(!render("pod-a", 10, &idle).unwrap().contains("port_used{"));
    }
}
