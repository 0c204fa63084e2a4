//! Instruction script rendering
//!
//! Turns an `InstructionOutcome` into the bash payload a node's startup agent
//! runs. Rendering is pure. Every interpolated value goes through
//! `shell_quote`.

use serde_json::json;
use std::fmt::Write;

use crate::common::{heredoc_safe, shell_quote};
use crate::coordinator::assembly::{AssemblyPlan, TieringPlan};
use crate::coordinator::register::InstructionOutcome;

/// Header carrying the report endpoint key
pub const REPORT_KEY_HEADER: &str = "X-Report-Key";

const ERROR_TERMINATOR: &str = "###ERROR";

const DEBUG_OVERRIDES: &[&str] = &[
    "allow_uncomputed_backend_checksum",
    "allow_azure_auto_detection",
];

/// Where generated scripts send progress and error reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportChannel {
    pub url: String,
    pub cluster: String,
    pub key: Option<String>,
}

impl ReportChannel {
    pub fn new(base_url: &str, cluster: &str, key: Option<String>) -> Self {
        Self {
            url: format!("{}/report", base_url.trim_end_matches('/')),
            cluster: cluster.to_string(),
            key,
        }
    }

    /// Bash function `report` posting its first argument as the JSON body
    fn function(&self) -> String {
        let key_header = self
            .key
            .as_ref()
            .map(|k| format!(" -H {}", shell_quote(&format!("{REPORT_KEY_HEADER}: {k}"))))
            .unwrap_or_default();
        format!(
            "report() {{\n  curl -sS -m 10 --retry 3 -X POST -H 'Content-Type: application/json'{} --data \"$1\" {} || true\n}}\n",
            key_header,
            shell_quote(&self.url)
        )
    }

    /// Call to `report`; the hostname is filled in on the node
    fn call(&self, kind: &str, message: &str) -> String {
        let body = json!({
            "cluster": self.cluster,
            "type": kind,
            "message": message,
        })
        .to_string();
        // Reopen the object to append the runtime hostname field
        let prefix = format!("{},\"hostname\":\"", body.trim_end_matches('}'));
        format!("report {}\"$(hostname)\"'\"}}'\n", shell_quote(&prefix))
    }
}

pub fn render(outcome: &InstructionOutcome, report: Option<&ReportChannel>) -> String {
    match outcome {
        InstructionOutcome::Wait {
            node,
            registered,
            expected,
        } => {
            let msg = format!(
                "This ({node}) is instance {registered}/{expected} that is ready for clusterization"
            );
            script_with_report(&msg, report)
        }
        InstructionOutcome::FormCluster(plan) => form_cluster_script(plan, report),
        InstructionOutcome::ShutDown => shutdown_script(),
        InstructionOutcome::Error(cause) => error_script(cause, report),
    }
}

fn script_with_report(msg: &str, report: Option<&ReportChannel>) -> String {
    let mut s = String::from("#!/bin/bash\n");
    if let Some(r) = report {
        s.push_str(&r.function());
    }
    let _ = writeln!(s, "echo {}", shell_quote(msg));
    if let Some(r) = report {
        s.push_str(&r.call("progress", msg));
    }
    s.push_str("exit 0\n");
    s
}

fn shutdown_script() -> String {
    "#!/bin/bash\necho 'Cluster is already at its expected size, shutting down'\nshutdown now\n"
        .to_string()
}

fn error_script(cause: &str, report: Option<&ReportChannel>) -> String {
    let mut s = String::from("#!/bin/bash\n");
    if let Some(r) = report {
        s.push_str(&r.function());
    }
    let _ = writeln!(s, "cat >&2 <<'{ERROR_TERMINATOR}'");
    let _ = writeln!(s, "{}", heredoc_safe(cause, ERROR_TERMINATOR));
    let _ = writeln!(s, "{ERROR_TERMINATOR}");
    if let Some(r) = report {
        s.push_str(&r.call("error", cause));
    }
    s.push_str("exit 1\n");
    s
}

fn tiering_commands(bin: &str, tiering: &TieringPlan) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "TIERING_SSD_PERCENT={}", tiering.ssd_percent);
    let _ = writeln!(s, "OBS_NAME={}", shell_quote(&tiering.account));
    let _ = writeln!(s, "OBS_CONTAINER_NAME={}", shell_quote(&tiering.container));
    let _ = writeln!(s, "OBS_BLOB_KEY={}", shell_quote(&tiering.access_key));
    let _ = writeln!(
        s,
        "{bin} fs tier s3 add azure-obs --site local --obs-name default-local --obs-type AZURE \
         --hostname \"$OBS_NAME.blob.core.windows.net\" --port 443 --bucket \"$OBS_CONTAINER_NAME\" \
         --access-key-id \"$OBS_NAME\" --secret-key \"$OBS_BLOB_KEY\" --protocol https --auth-method AWSSignature4"
    );
    let _ = writeln!(s, "{bin} fs tier s3 attach default azure-obs");
    // bc: the multiplication overflows 64-bit shell arithmetic on large clusters
    let _ = writeln!(
        s,
        "tiering_capacity=$(echo \"$full_capacity * 100 / $TIERING_SSD_PERCENT\" | bc)"
    );
    let _ = writeln!(s, "{bin} fs update default --total-capacity \"${{tiering_capacity}}B\"");
    s
}

fn form_cluster_script(plan: &AssemblyPlan, report: Option<&ReportChannel>) -> String {
    let bin = shell_quote(&plan.binary);
    let names: Vec<_> = plan.nodes.iter().map(|n| shell_quote(&n.name)).collect();
    let ips: Vec<_> = plan.nodes.iter().map(|n| shell_quote(&n.address)).collect();
    let dp = &plan.data_protection;

    let mut s = String::from("#!/bin/bash\nset -e\n");
    if let Some(r) = report {
        s.push_str(&r.function());
        s.push_str(&r.call("progress", "Running clusterization"));
    }

    let _ = writeln!(s, "CLUSTER_NAME={}", shell_quote(&plan.cluster_name));
    let _ = writeln!(s, "HOST_NAMES=({})", names.join(" "));
    let _ = writeln!(s, "HOST_IPS=({})", ips.join(" "));
    let _ = writeln!(s, "NVMES_NUM={}", plan.drives_per_node);
    let _ = writeln!(s, "ADMIN_USERNAME={}", shell_quote(&plan.credentials.username));
    let _ = writeln!(s, "ADMIN_PASSWORD={}", shell_quote(&plan.credentials.password));
    let _ = writeln!(s, "export INSTALL_DPDK={}", plan.features.install_dpdk);
    let _ = writeln!(s, "export SMBW_ENABLED={}", plan.features.smbw_enabled);
    let _ = writeln!(
        s,
        "export FRONTEND_CONTAINERS_NUM={}",
        plan.features.frontend_containers
    );

    let _ = writeln!(
        s,
        "{bin} cluster create \"${{HOST_NAMES[@]}}\" --host-ips \"$(IFS=,; echo \"${{HOST_IPS[*]}}\")\" --admin-password \"$ADMIN_PASSWORD\""
    );
    let _ = writeln!(s, "{bin} user login \"$ADMIN_USERNAME\" \"$ADMIN_PASSWORD\"");
    for key in DEBUG_OVERRIDES {
        let _ = writeln!(s, "{bin} debug override add --key {key}");
    }

    let _ = writeln!(s, "for (( i=0; i<${{#HOST_IPS[@]}}; i++ )); do");
    let _ = writeln!(s, "  for (( d=0; d<NVMES_NUM; d++ )); do");
    let _ = writeln!(s, "    {bin} cluster drive add \"$i\" \"/dev/nvme${{d}}n1\"");
    let _ = writeln!(s, "  done");
    let _ = writeln!(s, "done");

    if dp.stripe_width > 0 {
        let _ = writeln!(s, "{bin} cluster update --data-drives {}", dp.stripe_width);
    }
    if dp.protection_level > 0 {
        let _ = writeln!(s, "{bin} cluster update --parity-drives {}", dp.protection_level);
    }
    if dp.hotspare > 0 {
        let _ = writeln!(s, "{bin} cluster hot-spare {}", dp.hotspare);
    }
    let _ = writeln!(s, "{bin} cluster update --cluster-name \"$CLUSTER_NAME\"");

    if let Some(proxy) = &plan.proxy_url {
        let _ = writeln!(s, "{bin} cloud proxy --set {}", shell_quote(proxy));
    }
    if let Some(home) = &plan.home_url {
        let _ = writeln!(s, "{bin} cloud enable --cloud-url {}", shell_quote(home));
    }

    let _ = writeln!(s, "{bin} cluster start-io");
    let _ = writeln!(
        s,
        "full_capacity=$({bin} status -J | jq .capacity.unprovisioned_bytes)"
    );
    let _ = writeln!(s, "{bin} fs group create default");
    let _ = writeln!(s, "{bin} fs create default default \"${{full_capacity}}B\"");

    if let Some(tiering) = &plan.tiering {
        s.push_str(&tiering_commands(&bin, tiering));
    }

    if let Some(r) = report {
        s.push_str(&r.call("progress", "Clusterization completed successfully"));
    }
    s
}
