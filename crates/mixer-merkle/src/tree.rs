use crate::{Hash, MerkleError, PoseidonHasher, TreeHasher, MAX_HEIGHT};

/// sparse fixed-height tree; only populated nodes are materialised
#[derive(Clone, Debug)]
pub struct CommitmentTree {
    height: usize,
    /// layers[0] are the leaves, layers[height] holds at most the root
    layers: Vec<Vec<Hash>>,
    /// zeros[l] is the root of an empty subtree of height l
    zeros: Vec<Hash>,
}

/// inclusion proof, ordered leaf to root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub root: Hash,
    pub leaf_index: u32,
    pub path_elements: Vec<Hash>,
    /// 0 when the running node is a left child, 1 when right
    pub path_indices: Vec<u8>,
}

impl CommitmentTree {
    /// build from leaves already in leaf-index order
    pub fn build(height: usize, leaves: Vec<Hash>) -> Result<Self, MerkleError> {
        let mut hasher = PoseidonHasher::new()?;
        Self::build_with(&mut hasher, height, leaves)
    }

    /// build from `(leaf_index, commitment)` pairs in any order
    ///
    /// Indices must form exactly `0..n` once sorted. A missing index is a
    /// [`MerkleError::Gap`], a repeated one is a [`MerkleError::Duplicate`].
    pub fn from_indexed_leaves<I>(height: usize, leaves: I) -> Result<Self, MerkleError>
    where
        I: IntoIterator<Item = (u32, Hash)>,
    {
        let ordered = order_leaves(leaves)?;
        Self::build(height, ordered)
    }

    /// [`CommitmentTree::from_indexed_leaves`] with a caller-chosen hasher
    pub fn from_indexed_leaves_with<H, I>(
        hasher: &mut H,
        height: usize,
        leaves: I,
    ) -> Result<Self, MerkleError>
    where
        H: TreeHasher,
        I: IntoIterator<Item = (u32, Hash)>,
    {
        let ordered = order_leaves(leaves)?;
        Self::build_with(hasher, height, ordered)
    }

    pub fn build_with<H: TreeHasher>(
        hasher: &mut H,
        height: usize,
        leaves: Vec<Hash>,
    ) -> Result<Self, MerkleError> {
        if height == 0 || height > MAX_HEIGHT {
            return Err(MerkleError::InvalidHeight(height));
        }
        if (leaves.len() as u64) > (1u64 << height) {
            return Err(MerkleError::TreeFull {
                leaves: leaves.len(),
                height,
            });
        }

        let mut zeros = Vec::with_capacity(height + 1);
        zeros.push(hasher.zero_leaf());
        for level in 0..height {
            let z = zeros[level];
            zeros.push(hasher.hash_pair(&z, &z)?);
        }

        let mut layers = Vec::with_capacity(height + 1);
        layers.push(leaves);
        for level in 0..height {
            let current = &layers[level];
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                let right = pair.get(1).copied().unwrap_or(zeros[level]);
                next.push(hasher.hash_pair(&pair[0], &right)?);
            }
            layers.push(next);
        }

        Ok(Self {
            height,
            layers,
            zeros,
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    pub fn root(&self) -> Hash {
        self.layers[self.height]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.height])
    }

    pub fn leaf(&self, index: u32) -> Option<&Hash> {
        self.layers[0].get(index as usize)
    }

    /// position of a commitment among the leaves
    pub fn index_of(&self, leaf: &Hash) -> Option<u32> {
        self.layers[0]
            .iter()
            .position(|l| l == leaf)
            .map(|i| i as u32)
    }

    /// sibling path for the leaf at `index`
    pub fn path(&self, index: u32) -> Result<MerkleProof, MerkleError> {
        if index as usize >= self.len() {
            return Err(MerkleError::LeafOutOfRange(index));
        }

        let mut path_elements = Vec::with_capacity(self.height);
        let mut path_indices = Vec::with_capacity(self.height);
        let mut current = index as usize;

        for level in 0..self.height {
            let sibling = current ^ 1;
            path_elements.push(
                self.layers[level]
                    .get(sibling)
                    .copied()
                    .unwrap_or(self.zeros[level]),
            );
            path_indices.push((current & 1) as u8);
            current >>= 1;
        }

        Ok(MerkleProof {
            root: self.root(),
            leaf_index: index,
            path_elements,
            path_indices,
        })
    }
}

/// recompute the root from `leaf` and compare against `proof.root`
pub fn verify_path<H: TreeHasher>(
    hasher: &mut H,
    leaf: &Hash,
    proof: &MerkleProof,
) -> Result<bool, MerkleError> {
    if proof.path_elements.len() != proof.path_indices.len() {
        return Ok(false);
    }
    let mut node = *leaf;
    for (sibling, bit) in proof.path_elements.iter().zip(&proof.path_indices) {
        node = match bit {
            0 => hasher.hash_pair(&node, sibling)?,
            1 => hasher.hash_pair(sibling, &node)?,
            _ => return Ok(false),
        };
    }
    Ok(node == proof.root)
}

fn order_leaves<I>(leaves: I) -> Result<Vec<Hash>, MerkleError>
where
    I: IntoIterator<Item = (u32, Hash)>,
{
    let mut indexed: Vec<(u32, Hash)> = leaves.into_iter().collect();
    indexed.sort_by_key(|(index, _)| *index);

    let mut ordered = Vec::with_capacity(indexed.len());
    for (expected, (index, leaf)) in indexed.into_iter().enumerate() {
        let expected = expected as u32;
        if index < expected {
            return Err(MerkleError::Duplicate(index));
        }
        if index > expected {
            return Err(MerkleError::Gap {
                expected,
                found: index,
            });
        }
        ordered.push(leaf);
    }
    Ok(ordered)
}
