mod reconciliations;
mod sessions;
