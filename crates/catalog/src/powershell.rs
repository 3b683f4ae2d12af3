//! PowerShell script builders.
//!
//! Probes follow the executor convention: print the value and exit 0, or
//! exit [`ABSENT_EXIT_CODE`] when the resource or attribute does not exist.

use converge_tools::ABSENT_EXIT_CODE;

/// Render an argument, quoting only when PowerShell would split or
/// interpret it.
pub fn arg(value: &str) -> String {
    let bare = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '_' | '\\' | '/'));
    if bare {
        value.to_string()
    } else {
        quote(value)
    }
}

/// Double-quoted string with PowerShell escapes.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '`' | '$') {
            quoted.push('`');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// `$true` / `$false`.
pub fn bool_literal(value: bool) -> &'static str {
    if value {
        "$true"
    } else {
        "$false"
    }
}

/// `@('a','b')`.
pub fn array(values: &[String]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect();
    format!("@({})", items.join(","))
}

/// A single value bare, a list as an array.
pub fn list_arg(values: &[String], as_list: bool) -> String {
    match values {
        [single] if !as_list => arg(single),
        _ => array(values),
    }
}

/// Probe that succeeds iff `test` returns something truthy.
pub fn exists_probe(test: &str) -> String {
    format!("if ({}) {{ exit 0 }} else {{ exit {} }}", test, ABSENT_EXIT_CODE)
}

/// Probe that prints every element of `expr` on its own line, or reports
/// absence when it evaluates to `$null`.
pub fn value_probe(expr: &str) -> String {
    format!(
        "$value = {}; if ($null -eq $value) {{ exit {} }}; $value | ForEach-Object {{ \"$_\" }}",
        expr, ABSENT_EXIT_CODE
    )
}

/// Like [`value_probe`] for enumerations, printed in lower case.
pub fn lowercase_probe(expr: &str) -> String {
    format!(
        "$value = {}; if ($null -eq $value) {{ exit {} }}; \"$value\".ToLower()",
        expr, ABSENT_EXIT_CODE
    )
}

/// Probe printing `True` or `False` for a condition on an existing
/// resource; absent when `guard` fails.
pub fn flag_probe(guard: &str, condition: &str) -> String {
    format!(
        "if (-not ({})) {{ exit {} }}; if ({}) {{ 'True' }} else {{ 'False' }}",
        guard, ABSENT_EXIT_CODE, condition
    )
}

/// Script block that runs `command` under a domain credential.
pub fn with_credential(user: &str, password: &str, command: &str) -> String {
    format!(
        "$pass = ConvertTo-SecureString -String {} -AsPlainText -Force; \
         $cred = New-Object -TypeName System.Management.Automation.PSCredential -ArgumentList {},$pass; \
         Start-Process powershell.exe -Credential $cred -NoNewWindow -Wait -ArgumentList {}",
        quote(password),
        quote(user),
        quote(command)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_quoting() {
        assert_eq!(arg("LAN"), "LAN");
        assert_eq!(arg("192.168.10.10"), "192.168.10.10");
        assert_eq!(arg("8.00:00:00"), "8.00:00:00");
        assert_eq!(arg("Local Area Network"), "\"Local Area Network\"");
        assert_eq!(arg(""), "\"\"");
        assert_eq!(arg("a$b"), "\"a`$b\"");
    }

    #[test]
    fn test_arrays() {
        let servers = vec!["192.168.10.100".to_string(), "192.168.10.200".to_string()];
        assert_eq!(array(&servers), "@('192.168.10.100','192.168.10.200')");
        assert_eq!(list_arg(&servers[..1], false), "192.168.10.100");
        assert_eq!(list_arg(&servers[..1], true), "@('192.168.10.100')");
        assert_eq!(array(&["o'brien".to_string()]), "@('o''brien')");
    }

    #[test]
    fn test_probes_use_absent_exit_code() {
        assert_eq!(
            exists_probe("Get-DhcpServerv4Scope 192.168.10.0"),
            "if (Get-DhcpServerv4Scope 192.168.10.0) { exit 0 } else { exit 2 }"
        );
        assert!(value_probe("(Get-X).Y").contains("exit 2"));
        assert_eq!(bool_literal(true), "$true");
        assert_eq!(bool_literal(false), "$false");
    }

    #[test]
    fn test_credential_wrapper_quotes_secret() {
        let script = with_credential("CONTOSO\\dhcp_admin", "p$ss", "Add-DhcpServerInDC");
        assert!(script.contains("\"p`$ss\""));
        assert!(script.contains("\"CONTOSO\\dhcp_admin\""));
        assert!(script.contains("-ArgumentList \"Add-DhcpServerInDC\""));
    }
}
