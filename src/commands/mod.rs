/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint.

- `backups`: list, show, export, delete, and prune stored snapshots

Handlers open no stores themselves; `main` builds the store from the loaded
configuration and passes it in.
*/

pub mod backups;
