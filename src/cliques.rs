use petgraph::graphmap::UnGraphMap;

/// Number of `K_k` subgraphs and the lexicographically first one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliqueCensus {
    pub count: u64,
    pub first: Option<Vec<u32>>,
}

/// Count the `k`-cliques of `g` (vertices `0..n`).
///
/// Cliques are grown in increasing vertex order, each extension drawn from the
/// common neighbours of the vertices already chosen, so every clique is seen
/// exactly once and the first one seen is the smallest.
pub fn census(g: &UnGraphMap<u32, ()>, n: u32, k: u32) -> CliqueCensus {
    let mut out = CliqueCensus::default();
    if k == 0 {
        out.count = 1;
        out.first = Some(Vec::new());
        return out;
    }
    let candidates: Vec<u32> = (0..n).collect();
    let mut chosen = Vec::with_capacity(k as usize);
    extend(g, k as usize, &candidates, &mut chosen, &mut out);
    out
}

fn extend(
    g: &UnGraphMap<u32, ()>,
    k: usize,
    candidates: &[u32],
    chosen: &mut Vec<u32>,
    out: &mut CliqueCensus,
) {
    if chosen.len() == k {
        out.count += 1;
        if out.first.is_none() {
            out.first = Some(chosen.clone());
        }
        return;
    }
    let needed = k - chosen.len();
    for (i, &v) in candidates.iter().enumerate() {
        // not enough vertices left to finish a clique
        if candidates.len() - i < needed {
            break;
        }
        let next: Vec<u32> = candidates[i + 1..]
            .iter()
            .copied()
            .filter(|&w| g.contains_edge(v, w))
            .collect();
        chosen.push(v);
        extend(g, k, &next, chosen, out);
        chosen.pop();
    }
}

/// Complement of `g` on the vertex set `0..n`.
pub fn complement(g: &UnGraphMap<u32, ()>, n: u32) -> UnGraphMap<u32, ()> {
    let mut out = UnGraphMap::<u32, ()>::with_capacity(n as usize, 0);
    for v in 0..n {
        out.add_node(v);
    }
    for v in 1..n {
        for u in 0..v {
            if !g.contains_edge(u, v) {
                out.add_edge(u, v, ());
            }
        }
    }
    out
}

/// `"0,1,2"` style rendering used for clique witnesses.
pub fn join_vertices(vertices: &[u32]) -> String {
    vertices
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Edges as `u:v` with `u < v`, ordered by `u` then `v`, comma-separated.
pub fn edge_list(g: &UnGraphMap<u32, ()>, n: u32) -> String {
    let mut pairs = Vec::new();
    for u in 0..n {
        for v in u + 1..n {
            if g.contains_edge(u, v) {
                pairs.push(format!("{u}:{v}"));
            }
        }
    }
    pairs.join(",")
}
