use std::error::Error;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Returns true if the given binary is accessible in PATH.
fn tool_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

const OPERATOR_NAMESPACE: &str = "giantswarm";
const ORG_NAMESPACE: &str = "org-e2e";
const OPERATOR_NAME: &str = "cluster-apps-operator";
const CLUSTER_ID: &str = "e2e01";

// ---------------------------------------------------------------------------
// Cluster lifecycle on a real Kind cluster.
//
// Run with: cargo test --test e2e_kind -- --ignored
// ---------------------------------------------------------------------------

/// Exercises the full Cluster lifecycle:
///
/// 1. Start (or reuse) a Kind cluster.
/// 2. Install the CRDs printed by `crdgen`.
/// 3. Deploy the operator and apply a Cluster.
/// 4. Wait for the workload namespace and the values ConfigMaps.
/// 5. Delete the Cluster and verify namespace and values are cleaned up.
#[test]
#[ignore]
fn e2e_cluster_lifecycle() -> Result<(), Box<dyn Error>> {
    for tool in &["kind", "kubectl", "docker", "cargo"] {
        if !tool_available(tool) {
            eprintln!("Skipping e2e test: `{tool}` not found in PATH.");
            return Ok(());
        }
    }

    let cluster_name =
        std::env::var("KIND_CLUSTER_NAME").unwrap_or_else(|_| "cluster-apps-e2e".into());
    ensure_kind_cluster(&cluster_name)?;

    // ── Install the CRDs ─────────────────────────────────────────────────────
    let crds = run_cmd("cargo", &["run", "--quiet", "--bin", "crdgen"])?;
    kubectl_apply(&crds)?;

    // ── Deploy the operator ──────────────────────────────────────────────────
    let image = std::env::var("E2E_OPERATOR_IMAGE")
        .unwrap_or_else(|_| "cluster-apps-operator:e2e".into());
    if env_true("E2E_BUILD_IMAGE", true) {
        run_cmd("docker", &["build", "-t", &image, "."])?;
    }
    if env_true("E2E_LOAD_IMAGE", true) {
        run_cmd(
            "kind",
            &["load", "docker-image", &image, "--name", &cluster_name],
        )?;
    }

    let operator_yaml = operator_manifest(&image);
    let _cleanup = Cleanup {
        operator_manifest: operator_yaml.clone(),
    };

    for ns in [OPERATOR_NAMESPACE, ORG_NAMESPACE] {
        run_cmd_with_stdin(
            "kubectl",
            &["apply", "-f", "-"],
            &format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {ns}\n"),
        )?;
    }
    kubectl_apply(&operator_yaml)?;
    run_cmd(
        "kubectl",
        &[
            "rollout",
            "status",
            &format!("deployment/{OPERATOR_NAME}"),
            "-n",
            OPERATOR_NAMESPACE,
            "--timeout=180s",
        ],
    )?;

    // ── Apply a Cluster ──────────────────────────────────────────────────────
    kubectl_apply(&cluster_manifest())?;

    wait_for("workload namespace", Duration::from_secs(120), || {
        Ok(run_cmd("kubectl", &["get", "namespace", CLUSTER_ID]).is_ok())
    })?;

    for name in [
        format!("{CLUSTER_ID}-cluster-values"),
        format!("{CLUSTER_ID}-app-operator-values"),
    ] {
        wait_for(&name, Duration::from_secs(60), || {
            Ok(run_cmd("kubectl", &["get", "configmap", &name, "-n", ORG_NAMESPACE]).is_ok())
        })?;
    }

    let finalizers = run_cmd(
        "kubectl",
        &[
            "get",
            "clusters.cluster.x-k8s.io",
            CLUSTER_ID,
            "-n",
            ORG_NAMESPACE,
            "-o",
            "jsonpath={.metadata.finalizers}",
        ],
    )?;
    assert!(
        finalizers.contains("cluster-apps.giantswarm.io/finalizer"),
        "Cluster should carry the operator finalizer, got {finalizers}"
    );

    let notes = run_cmd(
        "kubectl",
        &[
            "get",
            "configmap",
            &format!("{CLUSTER_ID}-cluster-values"),
            "-n",
            ORG_NAMESPACE,
            "-o",
            "jsonpath={.metadata.annotations.giantswarm\\.io/notes}",
        ],
    )?;
    assert!(notes.starts_with("DO NOT EDIT"), "unexpected notes: {notes}");

    // ── Delete the Cluster ───────────────────────────────────────────────────
    run_cmd(
        "kubectl",
        &[
            "delete",
            "clusters.cluster.x-k8s.io",
            CLUSTER_ID,
            "-n",
            ORG_NAMESPACE,
            "--timeout=180s",
            "--wait=true",
        ],
    )?;

    wait_for("workload namespace removal", Duration::from_secs(180), || {
        Ok(run_cmd("kubectl", &["get", "namespace", CLUSTER_ID]).is_err())
    })?;

    let leftover = run_cmd(
        "kubectl",
        &[
            "get",
            "configmap",
            &format!("{CLUSTER_ID}-cluster-values"),
            "-n",
            ORG_NAMESPACE,
            "--ignore-not-found=true",
            "-o",
            "name",
        ],
    )?;
    assert!(leftover.is_empty(), "values ConfigMap left behind: {leftover}");

    Ok(())
}

fn cluster_manifest() -> String {
    format!(
        r#"apiVersion: cluster.x-k8s.io/v1beta1
kind: Cluster
metadata:
  name: {id}
  namespace: {ns}
  labels:
    giantswarm.io/cluster: {id}
    release.giantswarm.io/version: 25.0.0
spec:
  clusterNetwork:
    pods:
      cidrBlocks: ["10.244.0.0/16"]
"#,
        id = CLUSTER_ID,
        ns = ORG_NAMESPACE
    )
}

struct Cleanup {
    operator_manifest: String,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let _ = run_cmd_quiet(
            "kubectl",
            &[
                "delete",
                "clusters.cluster.x-k8s.io",
                CLUSTER_ID,
                "-n",
                ORG_NAMESPACE,
                "--ignore-not-found=true",
                "--timeout=60s",
            ],
        );
        let _ =
            run_cmd_with_stdin_quiet("kubectl", &["delete", "-f", "-"], &self.operator_manifest);
        for ns in [ORG_NAMESPACE, OPERATOR_NAMESPACE] {
            let _ = run_cmd_quiet(
                "kubectl",
                &["delete", "namespace", ns, "--ignore-not-found=true"],
            );
        }
    }
}

fn ensure_kind_cluster(name: &str) -> Result<(), Box<dyn Error>> {
    let clusters = run_cmd("kind", &["get", "clusters"])?;
    if clusters.lines().any(|line| line.trim() == name) {
        return Ok(());
    }
    run_cmd("kind", &["create", "cluster", "--name", name])?;
    Ok(())
}

fn kubectl_apply(manifest: &str) -> Result<(), Box<dyn Error>> {
    run_cmd_with_stdin("kubectl", &["apply", "-f", "-"], manifest)
}

fn run_cmd(program: &str, args: &[&str]) -> Result<String, Box<dyn Error>> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }
    let output = cmd.output()?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "command failed: {} {:?}\nstdout:\n{}\nstderr:\n{}",
            program, args, stdout, stderr
        )
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_cmd_with_stdin(program: &str, args: &[&str], input: &str) -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        use std::io::Write;
        stdin.write_all(input.as_bytes())?;
        stdin.flush()?;
        drop(stdin);
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "command failed: {} {:?}\nstdout:\n{}\nstderr:\n{}",
            program, args, stdout, stderr
        )
        .into());
    }
    Ok(())
}

fn wait_for<F>(label: &str, timeout: Duration, mut condition: F) -> Result<(), Box<dyn Error>>
where
    F: FnMut() -> Result<bool, Box<dyn Error>>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        if condition()? {
            return Ok(());
        }
        attempts += 1;
        if start.elapsed() > timeout {
            return Err(format!(
                "timeout while waiting for {} after {:?} (attempts={})",
                label, timeout, attempts
            )
            .into());
        }
        sleep(Duration::from_secs(3));
    }
}

fn env_true(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn operator_manifest(image: &str) -> String {
    format!(
        r#"---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: {operator_name}
  namespace: {operator_namespace}
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: {operator_name}-apps
  namespace: {operator_namespace}
data:
  apps.yaml: |
    default:
      catalog: default
      namespace: kube-system
      useUpgradeForce: true
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: {operator_name}
rules:
  - apiGroups: ["cluster.x-k8s.io"]
    resources: ["clusters"]
    verbs: ["get", "list", "watch", "update", "patch"]
  - apiGroups: ["application.giantswarm.io"]
    resources: ["apps", "appcatalogs"]
    verbs: ["get", "list", "watch", "create", "update", "patch", "delete"]
  - apiGroups: ["release.giantswarm.io"]
    resources: ["releases"]
    verbs: ["get", "list", "watch"]
  - apiGroups: ["*"]
    resources: ["*"]
    verbs: ["get"]
  - apiGroups: [""]
    resources: ["namespaces", "configmaps", "secrets"]
    verbs: ["get", "list", "watch", "create", "update", "patch", "delete"]
  - apiGroups: ["apps"]
    resources: ["deployments"]
    verbs: ["get", "list", "watch"]
  - apiGroups: ["coordination.k8s.io"]
    resources: ["leases"]
    verbs: ["get", "list", "watch", "create", "update", "patch", "delete"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: {operator_name}
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: {operator_name}
subjects:
  - kind: ServiceAccount
    name: {operator_name}
    namespace: {operator_namespace}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {operator_name}
  namespace: {operator_namespace}
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {operator_name}
  template:
    metadata:
      labels:
        app: {operator_name}
    spec:
      serviceAccountName: {operator_name}
      containers:
        - name: operator
          image: {image}
          imagePullPolicy: IfNotPresent
          args: ["run", "--app-config", "/etc/{operator_name}/apps.yaml"]
          env:
            - name: OPERATOR_NAMESPACE
              value: {operator_namespace}
            - name: BASE_DOMAIN
              value: e2e.example.com
          volumeMounts:
            - name: apps
              mountPath: /etc/{operator_name}
      volumes:
        - name: apps
          configMap:
            name: {operator_name}-apps
"#,
        operator_name = OPERATOR_NAME,
        operator_namespace = OPERATOR_NAMESPACE,
        image = image
    )
}

fn run_cmd_quiet(program: &str, args: &[&str]) -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }
    let _ = cmd.output();
    Ok(())
}

fn run_cmd_with_stdin_quiet(
    program: &str,
    args: &[&str],
    input: &str,
) -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        use std::io::Write;
        let _ = stdin.write_all(input.as_bytes());
        let _ = stdin.flush();
        drop(stdin);
    }
    let _ = child.wait_with_output();
    Ok(())
}
