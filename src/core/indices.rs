use hashbrown::HashMap;

/// Secondary index from a key to document ids in insertion order.
pub type VecIndex<K> = HashMap<K, Vec<String>>;

/// Appends `id` under `key`.
pub fn index_push(index: &mut VecIndex<String>, key: &str, id: &str) {
    index.entry_ref(key).or_default().push(id.to_string());
}

/// Removes `id` from `key`, dropping the key once empty.
pub fn index_remove(index: &mut VecIndex<String>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        if let Some(pos) = ids.iter().position(|x| x == id) {
            ids.remove(pos);
        }
        if ids.is_empty() {
            index.remove(key);
        }
    }
}
