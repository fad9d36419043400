//! Space definitions
//!
//! A space is a named keyspace partitioned by each of its subspaces into
//! regions. Every region covers a box `[lower, upper]` of the subspace's
//! hyperspace (one coordinate per subspace attribute) and is the unit of
//! replica placement.

use crate::common::utils::validate_name;
use crate::common::{Error, RegionId, Result, ServerId, SpaceId, SubspaceId, VirtualServerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Attribute value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int64,
    Float,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub datatype: DataType,
}

/// One assignment of a region to a physical server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub server: ServerId,
    pub virtual_server: VirtualServerId,
}

impl Replica {
    pub fn new(server: ServerId, virtual_server: VirtualServerId) -> Self {
        Self {
            server,
            virtual_server,
        }
    }
}

/// One shard of a subspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub lower_coord: Vec<u64>,
    pub upper_coord: Vec<u64>,
    /// Ordered replicas; the last one is the most recently added. During a
    /// live transfer the last two are the source and the destination.
    pub replicas: Vec<Replica>,
}

impl Region {
    pub fn new(lower_coord: Vec<u64>, upper_coord: Vec<u64>) -> Self {
        Self {
            id: RegionId(0),
            lower_coord,
            upper_coord,
            replicas: Vec::new(),
        }
    }

    /// Server ids of the replicas, in order
    pub fn servers(&self) -> Vec<ServerId> {
        self.replicas.iter().map(|r| r.server).collect()
    }

    pub fn has_server(&self, server: ServerId) -> bool {
        self.replicas.iter().any(|r| r.server == server)
    }

    /// True when the trailing replicas are `src` followed by `dst`.
    pub fn ends_with_pair(&self, src: ServerId, dst: ServerId) -> bool {
        let n = self.replicas.len();
        n > 1 && self.replicas[n - 2].server == src && self.replicas[n - 1].server == dst
    }
}

/// One partitioning of a space over a subset of its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subspace {
    pub id: SubspaceId,
    /// Indices into the space's attributes
    pub attrs: Vec<u16>,
    pub regions: Vec<Region>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
    /// The first attribute is the key
    pub attributes: Vec<Attribute>,
    /// Tolerated failures per region; replication factor is this plus one
    pub fault_tolerance: u64,
    pub predecessor_width: u64,
    pub subspaces: Vec<Subspace>,
}

impl Space {
    pub fn builder(name: impl Into<String>) -> SpaceBuilder {
        SpaceBuilder::new(name)
    }

    /// Replication factor
    pub fn replication(&self) -> u64 {
        self.fault_tolerance.saturating_add(1)
    }

    /// Structural validation of a space definition
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        if self.attributes.is_empty() {
            return Err(Error::Malformed(format!(
                "space \"{}\" has no key attribute",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for attr in &self.attributes {
            validate_name(&attr.name)?;
            if !names.insert(attr.name.as_str()) {
                return Err(Error::Malformed(format!(
                    "space \"{}\" declares attribute \"{}\" twice",
                    self.name, attr.name
                )));
            }
        }

        if self.fault_tolerance.checked_add(1).is_none() {
            return Err(Error::Malformed(format!(
                "space \"{}\" has an out-of-range fault tolerance {}",
                self.name, self.fault_tolerance
            )));
        }

        if self.predecessor_width == 0 {
            return Err(Error::Malformed(format!(
                "space \"{}\" needs a predecessor width of at least 1",
                self.name
            )));
        }

        match self.subspaces.first() {
            Some(ss) if ss.attrs == [0] => {}
            _ => {
                return Err(Error::Malformed(format!(
                    "the first subspace of \"{}\" must be exactly the key attribute",
                    self.name
                )))
            }
        }

        for (idx, ss) in self.subspaces.iter().enumerate() {
            self.validate_subspace(idx, ss)?;
        }

        Ok(())
    }

    fn validate_subspace(&self, idx: usize, ss: &Subspace) -> Result<()> {
        if ss.attrs.is_empty() {
            return Err(Error::Malformed(format!(
                "subspace {} of \"{}\" has no attributes",
                idx, self.name
            )));
        }

        let mut seen = HashSet::new();
        for &attr in &ss.attrs {
            if attr as usize >= self.attributes.len() {
                return Err(Error::Malformed(format!(
                    "subspace {} of \"{}\" references attribute {} which doesn't exist",
                    idx, self.name, attr
                )));
            }
            if !seen.insert(attr) {
                return Err(Error::Malformed(format!(
                    "subspace {} of \"{}\" repeats attribute {}",
                    idx, self.name, attr
                )));
            }
        }

        if ss.regions.is_empty() {
            return Err(Error::Malformed(format!(
                "subspace {} of \"{}\" has no regions",
                idx, self.name
            )));
        }

        for region in &ss.regions {
            if region.lower_coord.len() != ss.attrs.len()
                || region.upper_coord.len() != ss.attrs.len()
            {
                return Err(Error::Malformed(format!(
                    "a region of subspace {} of \"{}\" has {} dimensions, expected {}",
                    idx,
                    self.name,
                    region.lower_coord.len(),
                    ss.attrs.len()
                )));
            }

            if region
                .lower_coord
                .iter()
                .zip(&region.upper_coord)
                .any(|(lo, hi)| lo > hi)
            {
                return Err(Error::Malformed(format!(
                    "a region of subspace {} of \"{}\" has a lower bound above its upper bound",
                    idx, self.name
                )));
            }
        }

        Ok(())
    }

    /// Ids of every region in the space
    pub fn region_ids(&self) -> impl Iterator<Item = RegionId> + '_ {
        self.subspaces
            .iter()
            .flat_map(|ss| ss.regions.iter().map(|r| r.id))
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.subspaces.iter().flat_map(|ss| ss.regions.iter())
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.subspaces
            .iter_mut()
            .flat_map(|ss| ss.regions.iter_mut())
            .find(|r| r.id == id)
    }
}

/// Builder for space definitions
///
/// Regions are produced by evenly splitting the first dimension of each
/// subspace into `partitions` ranges; remaining dimensions span the full
/// coordinate range.
#[derive(Debug, Clone)]
pub struct SpaceBuilder {
    name: String,
    attributes: Vec<Attribute>,
    fault_tolerance: u64,
    predecessor_width: u64,
    subspaces: Vec<Vec<String>>,
    partitions: u64,
}

impl SpaceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            fault_tolerance: 2,
            predecessor_width: 1,
            subspaces: Vec::new(),
            partitions: 64,
        }
    }

    /// Add an attribute; the first one added is the key.
    pub fn attribute(mut self, name: impl Into<String>, datatype: DataType) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            datatype,
        });
        self
    }

    pub fn fault_tolerance(mut self, f: u64) -> Self {
        self.fault_tolerance = f;
        self
    }

    pub fn predecessor_width(mut self, p: u64) -> Self {
        self.predecessor_width = p;
        self
    }

    /// Add a secondary subspace over the named attributes
    pub fn subspace<S: AsRef<str>>(mut self, attrs: &[S]) -> Self {
        self.subspaces
            .push(attrs.iter().map(|a| a.as_ref().to_string()).collect());
        self
    }

    /// Regions per subspace
    pub fn partitions(mut self, n: u64) -> Self {
        self.partitions = n;
        self
    }

    pub fn build(self) -> Result<Space> {
        if self.partitions == 0 {
            return Err(Error::Malformed("a space needs at least one partition".into()));
        }

        let mut subspaces = Vec::with_capacity(self.subspaces.len() + 1);
        subspaces.push(Subspace {
            id: SubspaceId(0),
            attrs: vec![0],
            regions: partition_regions(1, self.partitions),
        });

        for names in &self.subspaces {
            let attrs = names
                .iter()
                .map(|n| {
                    self.attributes
                        .iter()
                        .position(|a| &a.name == n)
                        .map(|i| i as u16)
                        .ok_or_else(|| {
                            Error::Malformed(format!(
                                "subspace references unknown attribute \"{}\"",
                                n
                            ))
                        })
                })
                .collect::<Result<Vec<u16>>>()?;
            let regions = partition_regions(attrs.len(), self.partitions);
            subspaces.push(Subspace {
                id: SubspaceId(0),
                attrs,
                regions,
            });
        }

        let space = Space {
            id: SpaceId(0),
            name: self.name,
            attributes: self.attributes,
            fault_tolerance: self.fault_tolerance,
            predecessor_width: self.predecessor_width,
            subspaces,
        };
        space.validate()?;
        Ok(space)
    }
}

/// Compact space description accepted by `space_add` commands; regions are
/// generated by [`SpaceBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceDefinition {
    pub name: String,
    pub attributes: Vec<Attribute>,
    #[serde(default = "default_fault_tolerance")]
    pub fault_tolerance: u64,
    #[serde(default = "default_predecessor_width")]
    pub predecessor_width: u64,
    /// Secondary subspaces, by attribute name
    #[serde(default)]
    pub subspaces: Vec<Vec<String>>,
    #[serde(default = "default_partitions")]
    pub partitions: u64,
}

fn default_fault_tolerance() -> u64 {
    2
}

fn default_predecessor_width() -> u64 {
    1
}

fn default_partitions() -> u64 {
    64
}

impl SpaceDefinition {
    pub fn build(self) -> Result<Space> {
        let mut builder = Space::builder(self.name)
            .fault_tolerance(self.fault_tolerance)
            .predecessor_width(self.predecessor_width)
            .partitions(self.partitions);

        for attr in self.attributes {
            builder = builder.attribute(attr.name, attr.datatype);
        }
        for ss in &self.subspaces {
            builder = builder.subspace(ss.as_slice());
        }

        builder.build()
    }
}

/// Split the first of `dims` dimensions into `n` contiguous ranges.
fn partition_regions(dims: usize, n: u64) -> Vec<Region> {
    let step = u64::MAX / n;

    (0..n)
        .map(|i| {
            let lower = i * step;
            let upper = if i + 1 == n {
                u64::MAX
            } else {
                (i + 1) * step - 1
            };

            let mut lower_coord = vec![0; dims];
            let mut upper_coord = vec![u64::MAX; dims];
            if dims > 0 {
                lower_coord[0] = lower;
                upper_coord[0] = upper;
            }
            Region::new(lower_coord, upper_coord)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv() -> SpaceBuilder {
        Space::builder("kv")
            .attribute("k", DataType::String)
            .attribute("v", DataType::String)
    }

    #[test]
    fn test_builder() {
        let space = kv().subspace(&["v"]).partitions(4).build().unwrap();
        assert_eq!(space.subspaces.len(), 2);
        assert_eq!(space.subspaces[0].attrs, vec![0]);
        assert_eq!(space.subspaces[1].attrs, vec![1]);
        assert_eq!(space.subspaces[1].regions.len(), 4);
        assert_eq!(space.replication(), 3);
    }

    #[test]
    fn test_partitions_cover_range() {
        let regions = partition_regions(2, 3);
        assert_eq!(regions[0].lower_coord, vec![0, 0]);
        assert_eq!(regions[2].upper_coord[0], u64::MAX);
        for w in regions.windows(2) {
            assert_eq!(w[0].upper_coord[0] + 1, w[1].lower_coord[0]);
        }
        for r in &regions {
            assert_eq!(r.upper_coord[1], u64::MAX);
        }
    }

    #[test]
    fn test_single_partition() {
        let regions = partition_regions(1, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].lower_coord, vec![0]);
        assert_eq!(regions[0].upper_coord, vec![u64::MAX]);
    }

    #[test]
    fn test_definition_from_json() {
        let def: SpaceDefinition = serde_json::from_str(
            r#"{"name":"kv","attributes":[{"name":"k","datatype":"string"},{"name":"v","datatype":"int64"}],
                "fault_tolerance":1,"subspaces":[["v"]],"partitions":8}"#,
        )
        .unwrap();
        assert_eq!(def.predecessor_width, 1);

        let space = def.build().unwrap();
        assert_eq!(space.replication(), 2);
        assert_eq!(space.subspaces.len(), 2);
        assert_eq!(space.subspaces[1].regions.len(), 8);
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        assert!(Space::builder("bad name")
            .attribute("k", DataType::String)
            .build()
            .is_err());
        assert!(kv().attribute("k", DataType::Int64).build().is_err());
        assert!(Space::builder("empty").build().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_subspace_attr() {
        assert!(kv().subspace(&["nope"]).build().is_err());
        assert!(kv().subspace(&["v", "v"]).build().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_regions() {
        let mut space = kv().partitions(2).build().unwrap();
        space.subspaces[0].regions[0].lower_coord = vec![0, 0];
        assert!(matches!(space.validate(), Err(Error::Malformed(_))));

        let mut space = kv().partitions(2).build().unwrap();
        space.subspaces[0].regions[1].lower_coord = vec![u64::MAX];
        space.subspaces[0].regions[1].upper_coord = vec![0];
        assert!(space.validate().is_err());

        let mut space = kv().partitions(2).build().unwrap();
        space.subspaces[0].regions.clear();
        assert!(space.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_predecessor_width() {
        assert!(kv().predecessor_width(0).build().is_err());
        assert!(kv().partitions(0).build().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_fault_tolerance() {
        let err = kv().fault_tolerance(u64::MAX).build().unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        let space = kv().fault_tolerance(u64::MAX - 1).build().unwrap();
        assert_eq!(space.replication(), u64::MAX);
    }

    #[test]
    fn test_first_subspace_must_be_key() {
        let mut space = kv().build().unwrap();
        space.subspaces[0].attrs = vec![1];
        assert!(space.validate().is_err());
    }

    #[test]
    fn test_region_pair() {
        let mut region = Region::new(vec![0], vec![u64::MAX]);
        region.replicas = vec![
            Replica::new(ServerId(1), VirtualServerId(10)),
            Replica::new(ServerId(2), VirtualServerId(11)),
        ];
        assert!(region.ends_with_pair(ServerId(1), ServerId(2)));
        assert!(!region.ends_with_pair(ServerId(2), ServerId(1)));
        assert_eq!(region.servers(), vec![ServerId(1), ServerId(2)]);
        assert!(region.has_server(ServerId(2)));
    }
}
