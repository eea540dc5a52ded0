pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSTORE CONFIGURATION
# =============================================================================
# Access logs of authenticated requests are buffered per sink, written in bulks
# and pruned on a schedule. Quota usage is counted from the main sink.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logstore/config.yml
#   3. /etc/logstore/config.yml
#
# Durations use humantime syntax: 500ms, 10s, 1m, 1h, 30days.
# A value written as $env{...} with a variable name inside the braces is
# replaced by that environment variable before parsing.

# =============================================================================
# SINKS
# =============================================================================
# main is the primary sink (DuckDB, see storage below); usage is counted there.
# secondary is an optional in-process sink.
#
# debounce (optional): omitted means every record is written on its own.
#   min_frequency: write at least this often while records are buffered
#   max_bulk_size: write as soon as this many records are buffered
# cleanup (optional): omitted means records are kept forever.
#   interval: how often to prune
#   keep: records older than this are pruned
# on_flush_failure: drop (default) discards a bulk the storage refused,
#   retain keeps it buffered for the next trigger.
# max_retained: under retain, at most this many records stay buffered;
#   the oldest are dropped past it.

sinks:
  main:
    enabled: true
    debounce:
      min_frequency: 1m
      max_bulk_size: 500
    cleanup:
      interval: 1h
      keep: 720h
    on_flush_failure: drop
    max_retained: 10000

  secondary:
    enabled: false

# =============================================================================
# STORAGE
# =============================================================================

storage:
  path: ~/.local/share/logstore/access.duckdb

# =============================================================================
# QUOTAS (optional)
# =============================================================================
# Periods repeat every `interval` starting at `from`. With limit: false usage
# is accounted and notified but requests are never rejected.
#
# notifications: omitted means one notification when usage reaches amount.
#   percent: boundary as a share of amount
#   repeat: also notify at every multiple of the boundary
#   call_url: receives the notification as a JSON POST

quotas:
  - instance_id: example-instance
    unit: requests.all.authenticated
    from: 2024-01-01T00:00:00Z
    interval: 30days
    amount: 100000
    limit: true
    notifications:
      - id: almost-exhausted
        percent: 80
      - id: exhausted
        percent: 100
        repeat: true
        # call_url: https://billing.example.com/hooks/quota

# =============================================================================
# DRIVER
# =============================================================================
# How often overdue flushes and cleanups are fired when no requests arrive.

driver:
  tick_interval: 1s

# =============================================================================
# WEB SERVER
# =============================================================================

web:
  listen: 127.0.0.1:7105
"#
    .to_string()
}
